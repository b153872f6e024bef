//! Render delegate boundary.
//!
//! The executor never renders anything itself. It hands a single-shot
//! [`RenderRequest`] to a [`RenderDelegate`] and gets back a
//! [`RenderHandle`], which it polls on every tick for progress and
//! completion. The delegate side reports through the paired
//! [`RenderReporter`].

use serde::Serialize;
use shotfarm_core::types::{GlobalShotIndex, JobIndex, Timestamp};
use shotfarm_core::Queue;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Everything a delegate needs to render one shot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    /// Solo queue: one job with exactly one enabled shot.
    pub queue: Queue,
    pub scene_path: String,
    pub job_index: JobIndex,
    pub local_shot_index: usize,
    pub global_shot_index: GlobalShotIndex,
    /// Shared by every task of the dispatcher job; keeps output naming
    /// consistent across workers.
    pub initialization_time: Timestamp,
}

/// Completion report for one render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    pub fatal_error: bool,
    pub message: Option<String>,
}

impl RenderOutcome {
    pub fn success() -> Self {
        Self {
            fatal_error: false,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            fatal_error: true,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DelegateError {
    #[error("Failed to start render: {0}")]
    Spawn(String),

    #[error("Failed to encode render request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Executes single-shot renders.
///
/// `execute` must return promptly; the render itself runs elsewhere and
/// reports through the returned handle.
pub trait RenderDelegate: Send {
    fn execute(&mut self, request: RenderRequest) -> Result<RenderHandle, DelegateError>;
}

/// Executor-side view of an in-flight render.
#[derive(Debug)]
pub struct RenderHandle {
    completion: oneshot::Receiver<RenderOutcome>,
    progress: watch::Receiver<f32>,
    last_progress: f32,
    abort: CancellationToken,
}

/// Delegate-side half of a render.
#[derive(Debug)]
pub struct RenderReporter {
    completion: Option<oneshot::Sender<RenderOutcome>>,
    progress: watch::Sender<f32>,
    abort: CancellationToken,
}

/// Create a connected handle/reporter pair.
pub fn render_channel() -> (RenderHandle, RenderReporter) {
    let (completion_tx, completion) = oneshot::channel();
    let (progress_tx, progress) = watch::channel(0.0);
    let abort = CancellationToken::new();

    let handle = RenderHandle {
        completion,
        progress,
        last_progress: 0.0,
        abort: abort.clone(),
    };
    let reporter = RenderReporter {
        completion: Some(completion_tx),
        progress: progress_tx,
        abort,
    };
    (handle, reporter)
}

impl RenderHandle {
    /// Non-blocking completion check.
    ///
    /// A reporter dropped without finishing counts as a fatal failure.
    pub fn try_complete(&mut self) -> Option<RenderOutcome> {
        match self.completion.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(RenderOutcome::failed(
                "Render ended without reporting completion",
            )),
        }
    }

    /// Latest progress fraction, if it changed since the previous call.
    pub fn progress_update(&mut self) -> Option<f32> {
        let current = *self.progress.borrow();
        if (current - self.last_progress).abs() > f32::EPSILON {
            self.last_progress = current;
            Some(current)
        } else {
            None
        }
    }

    /// Ask the delegate to stop. The render still reports completion.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort.is_cancelled()
    }
}

impl RenderReporter {
    /// Publish progress as a fraction in `[0, 1]`.
    pub fn set_progress(&self, fraction: f32) {
        // No receiver means the executor already gave up on this render.
        let _ = self.progress.send(fraction.clamp(0.0, 1.0));
    }

    pub fn finish(mut self, outcome: RenderOutcome) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }

    /// Token cancelled when the executor aborts this render.
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn pending_until_finished() {
        let (mut handle, reporter) = render_channel();
        assert!(handle.try_complete().is_none());
        reporter.finish(RenderOutcome::success());
        assert_eq!(handle.try_complete(), Some(RenderOutcome::success()));
    }

    #[test]
    fn dropped_reporter_is_fatal() {
        let (mut handle, reporter) = render_channel();
        drop(reporter);
        assert_matches!(handle.try_complete(), Some(RenderOutcome { fatal_error: true, .. }));
    }

    #[test]
    fn progress_reported_once_per_change() {
        let (mut handle, reporter) = render_channel();
        assert_eq!(handle.progress_update(), None);
        reporter.set_progress(0.5);
        assert_eq!(handle.progress_update(), Some(0.5));
        assert_eq!(handle.progress_update(), None);
        reporter.set_progress(3.0);
        assert_eq!(handle.progress_update(), Some(1.0));
    }

    #[test]
    fn progress_survives_reporter_drop() {
        let (mut handle, reporter) = render_channel();
        reporter.set_progress(0.75);
        reporter.finish(RenderOutcome::success());
        assert_eq!(handle.progress_update(), Some(0.75));
        assert!(handle.try_complete().is_some());
    }

    #[test]
    fn abort_reaches_reporter() {
        let (handle, reporter) = render_channel();
        assert!(!reporter.is_aborted());
        handle.abort();
        assert!(reporter.is_aborted());
        assert!(handle.is_abort_requested());
    }
}
