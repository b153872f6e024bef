//! Solo queue construction.
//!
//! The delegate renders whole queues, so a single shot is rendered by
//! handing it a throwaway queue that holds a copy of the target job with
//! every other shot disabled.

use crate::error::CoreError;
use crate::queue::Queue;
use crate::resolver::ShotAddress;

/// Build a one-job queue in which only `address.local_shot_index` is enabled.
///
/// The job is deep-copied; `source` is left untouched.
pub fn build_solo_queue(source: &Queue, address: ShotAddress) -> Result<Queue, CoreError> {
    let job = source.job(address.job_index)?;
    if address.local_shot_index >= job.shots.len() {
        return Err(CoreError::IndexOutOfRange {
            index: address.local_shot_index,
            total: job.shots.len(),
        });
    }

    let mut solo = Queue::new();
    let copy = solo.duplicate_job(job);
    for shot in &mut copy.shots {
        shot.enabled = shot.index == address.local_shot_index;
    }

    tracing::debug!(
        job = %copy.display_name(),
        shot_count = copy.shots.len(),
        local_shot_index = address.local_shot_index,
        "Built solo queue",
    );

    Ok(solo)
}
