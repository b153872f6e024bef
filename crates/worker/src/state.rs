//! Executor state.

use shotfarm_core::types::{GlobalShotIndex, JobIndex, Timestamp};

use crate::delegate::RenderHandle;

/// Status strings reported to the dispatcher.
pub mod status {
    pub const IDLE: &str = "Idle";
    pub const LOADING_SCENE: &str = "Loading Map";
    pub const RENDERING: &str = "Rendering";
    pub const ERRORED: &str = "Errored";
}

/// Lifecycle phase of the executor.
///
/// `Errored` is terminal: once entered, no further tasks are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, nothing loaded yet.
    Idle,
    AwaitingManifest,
    /// Manifest loaded, waiting for the first task.
    Ready,
    LoadingScene,
    Rendering,
    ReportingCompletion,
    Errored,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingManifest => "awaiting_manifest",
            Self::Ready => "ready",
            Self::LoadingScene => "loading_scene",
            Self::Rendering => "rendering",
            Self::ReportingCompletion => "reporting_completion",
            Self::Errored => "errored",
        }
    }

    /// Whether a new task may start in this phase.
    pub fn accepts_tasks(self) -> bool {
        matches!(self, Self::Ready | Self::Idle)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state owned by the executor.
#[derive(Debug)]
pub struct ExecutorState {
    pub phase: Phase,
    pub current_job_index: Option<JobIndex>,
    pub current_local_shot_index: Option<usize>,
    pub current_global_shot_index: Option<GlobalShotIndex>,
    pub has_loaded_scene_once: bool,
    pub job_submit_time: Option<Timestamp>,
    /// Last status sent to the dispatcher.
    pub status: String,
    /// Last progress fraction sent to the dispatcher.
    pub progress: f32,
    pub active_render: Option<RenderHandle>,
    pub consecutive_failures: u32,
}

impl Default for ExecutorState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            current_job_index: None,
            current_local_shot_index: None,
            current_global_shot_index: None,
            has_loaded_scene_once: false,
            job_submit_time: None,
            status: status::IDLE.to_string(),
            progress: 0.0,
            active_render: None,
            consecutive_failures: 0,
        }
    }
}

impl ExecutorState {
    pub fn is_rendering(&self) -> bool {
        self.active_render.is_some()
    }

    /// Forget the task that just ended.
    pub fn clear_task(&mut self) {
        self.current_job_index = None;
        self.current_local_shot_index = None;
        self.current_global_shot_index = None;
        self.job_submit_time = None;
        self.active_render = None;
    }
}
