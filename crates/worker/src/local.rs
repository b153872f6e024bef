//! In-process dispatcher for `--local` runs.
//!
//! [`LocalDispatch`] stands in for the farm dispatcher: it hands out
//! START_TASK for every global shot index in order, one at a time,
//! waiting for each END_TASK before issuing the next.

use std::sync::{Arc, Mutex, MutexGuard};

use shotfarm_core::submit_time::format_submit_time;
use shotfarm_core::types::Timestamp;
use shotfarm_remote::{ChannelError, DispatcherLink, RemoteCommand};

#[derive(Debug, Default)]
struct Progress {
    total: usize,
    next: usize,
    in_flight: Option<usize>,
    succeeded: usize,
    failed: usize,
}

/// [`DispatcherLink`] that walks the whole queue in order.
pub struct LocalDispatch {
    submit_time: String,
    progress: Arc<Mutex<Progress>>,
}

/// Read-only view of a [`LocalDispatch`] run, kept by the service loop.
#[derive(Clone)]
pub struct LocalProgress {
    progress: Arc<Mutex<Progress>>,
}

impl LocalDispatch {
    /// Dispatch shots `0..total_shots`, all sharing `submit_time`.
    pub fn new(total_shots: usize, submit_time: Timestamp) -> (Self, LocalProgress) {
        let progress = Arc::new(Mutex::new(Progress {
            total: total_shots,
            ..Default::default()
        }));
        let dispatch = Self {
            submit_time: format_submit_time(&submit_time),
            progress: Arc::clone(&progress),
        };
        (dispatch, LocalProgress { progress })
    }
}

fn lock(progress: &Mutex<Progress>) -> MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DispatcherLink for LocalDispatch {
    fn send(&mut self, command: RemoteCommand) -> Result<(), ChannelError> {
        if let RemoteCommand::EndTask(data) = command {
            let mut progress = lock(&self.progress);
            if progress.in_flight != Some(data.shot_index) {
                tracing::warn!(
                    shot_index = data.shot_index,
                    in_flight = ?progress.in_flight,
                    "END_TASK for a shot that was not dispatched",
                );
                return Ok(());
            }
            progress.in_flight = None;
            if data.success {
                progress.succeeded += 1;
            } else {
                progress.failed += 1;
            }
            tracing::info!(
                shot_index = data.shot_index,
                success = data.success,
                done = progress.succeeded + progress.failed,
                total = progress.total,
                "Local shot complete",
            );
        }
        Ok(())
    }

    fn drain(&mut self) -> Vec<RemoteCommand> {
        let mut progress = lock(&self.progress);
        if progress.in_flight.is_some() || progress.next >= progress.total {
            return Vec::new();
        }
        let shot = progress.next;
        progress.next += 1;
        progress.in_flight = Some(shot);
        vec![RemoteCommand::start_task(shot, self.submit_time.clone())]
    }

    fn is_connected(&self) -> bool {
        true
    }
}

impl LocalProgress {
    /// Every shot has been dispatched and reported back.
    pub fn is_finished(&self) -> bool {
        let progress = lock(&self.progress);
        progress.in_flight.is_none() && progress.next >= progress.total
    }

    pub fn succeeded(&self) -> usize {
        lock(&self.progress).succeeded
    }

    pub fn failed(&self) -> usize {
        lock(&self.progress).failed
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    fn dispatch(total: usize) -> (LocalDispatch, LocalProgress) {
        let time = chrono::Utc.with_ymd_and_hms(2020, 12, 8, 13, 10, 55).unwrap();
        LocalDispatch::new(total, time)
    }

    #[test]
    fn issues_one_task_at_a_time() {
        let (mut link, progress) = dispatch(2);

        let first = link.drain();
        assert_matches!(
            first.as_slice(),
            [RemoteCommand::StartTask(data)]
                if data.shot_index == 0 && data.job_submit_time == "12/08/2020 13:10:55"
        );
        assert!(link.drain().is_empty(), "waits for END_TASK");

        link.send(RemoteCommand::status("Rendering")).unwrap();
        assert!(link.drain().is_empty());

        link.send(RemoteCommand::end_task(0, true)).unwrap();
        assert_matches!(
            link.drain().as_slice(),
            [RemoteCommand::StartTask(data)] if data.shot_index == 1
        );
        assert!(!progress.is_finished());

        link.send(RemoteCommand::end_task(1, false)).unwrap();
        assert!(link.drain().is_empty());
        assert!(progress.is_finished());
        assert_eq!(progress.succeeded(), 1);
        assert_eq!(progress.failed(), 1);
    }

    #[test]
    fn stray_end_task_is_ignored() {
        let (mut link, progress) = dispatch(1);
        link.send(RemoteCommand::end_task(5, true)).unwrap();
        assert_eq!(progress.succeeded(), 0);
        assert_eq!(link.drain().len(), 1);
    }

    #[test]
    fn empty_queue_is_finished_immediately() {
        let (mut link, progress) = dispatch(0);
        assert!(link.drain().is_empty());
        assert!(progress.is_finished());
    }
}
