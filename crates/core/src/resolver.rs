//! Global shot index resolution.
//!
//! The dispatcher addresses shots with a single flat integer that
//! enumerates every shot of every job in queue order. [`resolve`] maps
//! that integer back to a `(job, shot)` pair; [`global_index`] is its
//! inverse.

use crate::error::CoreError;
use crate::queue::Queue;
use crate::types::{GlobalShotIndex, JobIndex};

/// A shot addressed by job position and position within the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShotAddress {
    pub job_index: JobIndex,
    pub local_shot_index: usize,
}

/// Map a global shot index to the job and local shot it designates.
///
/// Walks the jobs accumulating shot counts; the first job whose
/// cumulative count exceeds `global` owns the shot. Jobs without shots
/// are skipped naturally.
pub fn resolve(queue: &Queue, global: GlobalShotIndex) -> Result<ShotAddress, CoreError> {
    let mut accumulated = 0usize;
    for (job_index, job) in queue.jobs.iter().enumerate() {
        let before = accumulated;
        accumulated += job.shots.len();
        if global < accumulated {
            return Ok(ShotAddress {
                job_index,
                local_shot_index: global - before,
            });
        }
    }
    Err(CoreError::IndexOutOfRange {
        index: global,
        total: accumulated,
    })
}

/// Reconstruct the global index of `(job_index, local_shot_index)`.
///
/// Returns `None` when either coordinate is out of range.
pub fn global_index(
    queue: &Queue,
    job_index: JobIndex,
    local_shot_index: usize,
) -> Option<GlobalShotIndex> {
    let job = queue.jobs.get(job_index)?;
    if local_shot_index >= job.shots.len() {
        return None;
    }
    let before: usize = queue.jobs[..job_index].iter().map(|j| j.shots.len()).sum();
    Some(before + local_shot_index)
}
