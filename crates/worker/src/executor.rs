//! Render queue executor.
//!
//! [`QueueExecutor`] owns the [`ExecutorState`] and drives it from
//! [`RenderExecutor::on_tick`]. A tick drains dispatcher commands, acts
//! on them, then polls the active render for progress and completion.
//! Every transition happens synchronously inside a tick; the only wait
//! state is `Rendering`, which the tick polls.
//!
//! Every event reported to the dispatcher is also logged locally, so a
//! worker without a dispatcher link loses no information.

use std::path::Path;

use shotfarm_core::manifest::ManifestLoader;
use shotfarm_core::submit_time::parse_submit_time;
use shotfarm_core::types::GlobalShotIndex;
use shotfarm_core::{build_solo_queue, resolve, ConfigOverrides, CoreError, Queue};
use shotfarm_remote::messages::StartTaskData;
use shotfarm_remote::{DispatcherLink, RemoteCommand, Severity};

use crate::config::WorkerConfig;
use crate::delegate::{DelegateError, RenderDelegate, RenderOutcome, RenderRequest};
use crate::scene::{SceneLoadError, SceneLoadOutcome, SceneLoader};
use crate::state::{status, ExecutorState, Phase};

/// Smallest progress change forwarded to the dispatcher.
const PROGRESS_STEP: f32 = 0.01;

/// One shot requested by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotTask {
    pub global_shot_index: GlobalShotIndex,
    /// Raw dispatcher timestamp, e.g. `12/08/2020 13:10:55`.
    pub job_submit_time: String,
}

impl From<StartTaskData> for ShotTask {
    fn from(data: StartTaskData) -> Self {
        Self {
            global_shot_index: data.shot_index,
            job_submit_time: data.job_submit_time,
        }
    }
}

/// Host-facing contract of a shot executor.
pub trait RenderExecutor {
    /// Begin rendering one shot. Failures are reported to the dispatcher
    /// before this returns; the `Err` is informational for the caller.
    fn start(&mut self, task: ShotTask) -> Result<(), ExecutorError>;

    /// Advance the state machine by one tick.
    fn on_tick(&mut self);

    fn is_busy(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    SceneLoad(#[from] SceneLoadError),

    #[error(transparent)]
    Delegate(#[from] DelegateError),

    #[error("Shot {active} is still rendering")]
    Busy { active: GlobalShotIndex },

    #[error("Executor cannot accept tasks while {0}")]
    NotReady(Phase),
}

/// Executor policy knobs.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Failed tasks in a row before the executor enters `Errored`.
    pub max_consecutive_failures: u32,
    pub overrides: ConfigOverrides,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            overrides: ConfigOverrides::default(),
        }
    }
}

impl From<&WorkerConfig> for ExecutorSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures,
            overrides: config.overrides.clone(),
        }
    }
}

pub struct QueueExecutor {
    queue: Option<Queue>,
    state: ExecutorState,
    scenes: SceneLoader,
    delegate: Box<dyn RenderDelegate>,
    link: Option<Box<dyn DispatcherLink>>,
    settings: ExecutorSettings,
    link_degraded: bool,
    shutdown_requested: bool,
}

impl QueueExecutor {
    pub fn new(
        scenes: SceneLoader,
        delegate: Box<dyn RenderDelegate>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            queue: None,
            state: ExecutorState::default(),
            scenes,
            delegate,
            link: None,
            settings,
            link_degraded: false,
            shutdown_requested: false,
        }
    }

    /// Load the manifest named on the command line.
    ///
    /// A missing argument or a manifest that cannot be loaded puts the
    /// executor in `Errored`.
    pub fn initialize(
        &mut self,
        manifest: Option<&Path>,
        loader: &ManifestLoader,
    ) -> Result<(), ExecutorError> {
        self.state.phase = Phase::AwaitingManifest;

        let Some(manifest) = manifest else {
            let message = "Missing '--manifest' argument; no render queue to execute".to_string();
            self.enter_errored(&message);
            return Err(ExecutorError::Configuration(message));
        };

        let queue = match loader.load(manifest) {
            Ok(queue) => queue,
            Err(e) => {
                self.enter_errored(&format!("Failed to load manifest: {e}"));
                return Err(e.into());
            }
        };

        tracing::info!(
            manifest = %manifest.display(),
            jobs = queue.jobs.len(),
            shots = queue.total_shots(),
            "Render queue ready",
        );
        self.queue = Some(queue);
        self.state.phase = Phase::Ready;
        Ok(())
    }

    /// Route dispatcher traffic through `link`.
    pub fn attach_link(&mut self, link: Box<dyn DispatcherLink>) {
        self.link = Some(link);
        self.link_degraded = false;
    }

    /// Tell the dispatcher this worker is waiting for tasks.
    pub fn announce_ready(&mut self) {
        self.log(
            Severity::Log,
            "Executor initialized and awaiting commands from dispatcher...",
        );
        self.set_status(status::IDLE);
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn state(&self) -> &ExecutorState {
        &self.state
    }

    pub fn queue(&self) -> Option<&Queue> {
        self.queue.as_ref()
    }

    pub fn scenes(&self) -> &SceneLoader {
        &self.scenes
    }

    /// True while the last send to the dispatcher failed.
    pub fn link_degraded(&self) -> bool {
        self.link_degraded
    }

    /// Set once the executor has reached `Errored`.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Abort the active render, if any. Used on process shutdown.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.state.active_render.take() {
            tracing::warn!(
                shot_index = ?self.state.current_global_shot_index,
                "Shutting down with a render in flight; aborting it",
            );
            handle.abort();
        }
    }

    fn handle_command(&mut self, command: RemoteCommand) {
        match command {
            RemoteCommand::StartTask(data) => {
                if let Err(e) = self.start(data.into()) {
                    tracing::debug!(error = %e, "START_TASK not executed");
                }
            }
            RemoteCommand::StopTask(data) => self.stop(data.reason.as_deref()),
            other => {
                tracing::warn!(
                    command_type = other.command_type(),
                    "Ignoring command that only flows to the dispatcher",
                );
            }
        }
    }

    fn start_task(&mut self, task: ShotTask) -> Result<(), ExecutorError> {
        let global = task.global_shot_index;

        if self.state.phase == Phase::Errored {
            return Err(ExecutorError::NotReady(Phase::Errored));
        }
        if let Some(active) = self.busy_with() {
            self.log(
                Severity::Error,
                format!("Cannot start shot {global}: shot {active} is still rendering"),
            );
            return Err(ExecutorError::Busy { active });
        }
        let phase = self.state.phase;
        let Some(queue) = self.queue.as_ref().filter(|_| phase.accepts_tasks()) else {
            self.log(
                Severity::Error,
                format!("Cannot start shot {global}: executor is {phase}"),
            );
            return Err(ExecutorError::NotReady(phase));
        };

        let resolved = resolve(queue, global);
        self.state.current_global_shot_index = Some(global);
        self.log(Severity::Log, format!("Starting task for global shot index {global}"));

        let address = match resolved {
            Ok(address) => address,
            Err(e) => {
                self.emit(RemoteCommand::end_task(global, false));
                self.enter_errored(&format!("Task for shot {global} rejected: {e}"));
                return Err(e.into());
            }
        };

        let initialization_time = match parse_submit_time(&task.job_submit_time) {
            Ok(time) => time,
            Err(e) => {
                self.fail_task(global, &e.to_string());
                return Err(e.into());
            }
        };

        self.state.current_job_index = Some(address.job_index);
        self.state.current_local_shot_index = Some(address.local_shot_index);
        self.state.job_submit_time = Some(initialization_time);

        let mut solo = match self.queue.as_ref().map(|queue| build_solo_queue(queue, address)) {
            Some(Ok(solo)) => solo,
            Some(Err(e)) => {
                self.fail_task(global, &e.to_string());
                return Err(e.into());
            }
            None => return Err(ExecutorError::NotReady(phase)),
        };
        let scene_path = solo
            .jobs
            .first()
            .map(|job| job.scene_path.clone())
            .unwrap_or_default();

        self.state.phase = Phase::LoadingScene;
        if let Err(e) = self.load_scene(&scene_path) {
            self.fail_task(global, &e.to_string());
            return Err(e.into());
        }

        if !self.settings.overrides.is_empty() {
            for job in &mut solo.jobs {
                job.configuration.apply_overrides(&self.settings.overrides);
            }
        }

        self.set_status(status::RENDERING);
        self.set_progress(0.0);

        let request = RenderRequest {
            queue: solo,
            scene_path,
            job_index: address.job_index,
            local_shot_index: address.local_shot_index,
            global_shot_index: global,
            initialization_time,
        };
        match self.delegate.execute(request) {
            Ok(handle) => {
                tracing::info!(
                    job_index = address.job_index,
                    local_shot_index = address.local_shot_index,
                    shot_index = global,
                    "Render started",
                );
                self.state.active_render = Some(handle);
                self.state.phase = Phase::Rendering;
                Ok(())
            }
            Err(e) => {
                self.fail_task(global, &e.to_string());
                Err(e.into())
            }
        }
    }

    fn load_scene(&mut self, scene_path: &str) -> Result<(), SceneLoadError> {
        if self.scenes.needs_load(scene_path) {
            self.log(Severity::Log, format!("Loading target scene: {scene_path}"));
            self.set_status(status::LOADING_SCENE);
            self.set_progress(0.0);
        }

        match self.scenes.ensure_loaded(scene_path)? {
            SceneLoadOutcome::Loaded { elapsed } => {
                self.state.has_loaded_scene_once = true;
                self.log(
                    Severity::Log,
                    format!("Scene load took: {:.2} seconds.", elapsed.as_secs_f64()),
                );
            }
            SceneLoadOutcome::AlreadyLoaded => {
                tracing::debug!(scene = %scene_path, "Scene already loaded");
            }
        }
        Ok(())
    }

    fn stop(&mut self, reason: Option<&str>) {
        let reason = reason.unwrap_or("no reason given");
        match &self.state.active_render {
            Some(handle) => {
                handle.abort();
                let shot = self.state.current_global_shot_index.unwrap_or_default();
                self.log(
                    Severity::Warning,
                    format!("Stop requested for shot {shot} ({reason}); aborting render"),
                );
            }
            None => {
                tracing::info!(reason, "Stop requested while idle; nothing to abort");
            }
        }
    }

    fn poll_render(&mut self) {
        let Some(handle) = self.state.active_render.as_mut() else {
            return;
        };
        let progress = handle.progress_update();
        let outcome = handle.try_complete();

        if let Some(fraction) = progress {
            if (fraction - self.state.progress).abs() >= PROGRESS_STEP || fraction >= 1.0 {
                self.set_progress(fraction);
            }
        }
        if let Some(outcome) = outcome {
            self.finish_shot(outcome);
        }
    }

    fn finish_shot(&mut self, outcome: RenderOutcome) {
        self.state.phase = Phase::ReportingCompletion;
        self.state.active_render = None;

        let global = self.state.current_global_shot_index.unwrap_or_default();
        let local = self.state.current_local_shot_index.unwrap_or_default();
        let mut message = format!("Shot finished! Shot: {local} (Local) {global} (Global)");
        if let Some(detail) = &outcome.message {
            message.push_str(": ");
            message.push_str(detail);
        }
        let severity = if outcome.fatal_error {
            Severity::Error
        } else {
            Severity::Log
        };
        self.log(severity, message);

        self.set_status(status::IDLE);
        self.set_progress(0.0);
        self.emit(RemoteCommand::end_task(global, !outcome.fatal_error));
        self.state.clear_task();

        if outcome.fatal_error {
            self.record_failure();
        } else {
            self.state.consecutive_failures = 0;
            self.state.phase = Phase::Idle;
        }
    }

    /// Report a task that ended before rendering began.
    fn fail_task(&mut self, global: GlobalShotIndex, reason: &str) {
        self.log(Severity::Error, format!("Task for shot {global} failed: {reason}"));
        self.set_status(status::IDLE);
        self.set_progress(0.0);
        self.emit(RemoteCommand::end_task(global, false));
        self.state.clear_task();
        self.record_failure();
    }

    fn record_failure(&mut self) {
        self.state.consecutive_failures += 1;
        let failures = self.state.consecutive_failures;
        if failures >= self.settings.max_consecutive_failures {
            self.enter_errored(&format!("{failures} consecutive tasks failed; giving up"));
        } else {
            self.state.phase = Phase::Idle;
        }
    }

    fn enter_errored(&mut self, reason: &str) {
        if self.state.phase == Phase::Errored {
            return;
        }
        self.log(Severity::Error, reason);
        self.set_status(status::ERRORED);
        if let Some(handle) = self.state.active_render.take() {
            handle.abort();
        }
        self.state.phase = Phase::Errored;
        self.shutdown_requested = true;
    }

    fn busy_with(&self) -> Option<GlobalShotIndex> {
        self.state
            .active_render
            .as_ref()
            .map(|_| self.state.current_global_shot_index.unwrap_or_default())
    }

    fn log(&mut self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Log => tracing::info!(target: "shotfarm_worker::dispatcher", "{message}"),
            Severity::Warning => tracing::warn!(target: "shotfarm_worker::dispatcher", "{message}"),
            Severity::Error => tracing::error!(target: "shotfarm_worker::dispatcher", "{message}"),
        }
        self.emit(RemoteCommand::log(severity, message));
    }

    fn set_status(&mut self, status: &str) {
        if self.state.status != status {
            tracing::info!(status, "Status changed");
        }
        self.state.status = status.to_string();
        self.emit(RemoteCommand::status(status));
    }

    fn set_progress(&mut self, fraction: f32) {
        self.state.progress = fraction.clamp(0.0, 1.0);
        tracing::debug!(progress = self.state.progress, "Progress");
        self.emit(RemoteCommand::progress(self.state.progress));
    }

    /// Best-effort delivery; each run of failed sends is reported once.
    fn emit(&mut self, command: RemoteCommand) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        match link.send(command) {
            Ok(()) if self.link_degraded => {
                tracing::info!("Dispatcher reachable again");
                self.link_degraded = false;
            }
            Ok(()) => {}
            Err(e) if !self.link_degraded => {
                tracing::warn!(
                    error = %e,
                    "Dispatcher unreachable; continuing with local logging only",
                );
                self.link_degraded = true;
            }
            Err(_) => {}
        }
    }
}

impl RenderExecutor for QueueExecutor {
    fn start(&mut self, task: ShotTask) -> Result<(), ExecutorError> {
        self.start_task(task)
    }

    fn on_tick(&mut self) {
        if self.state.phase == Phase::Errored {
            return;
        }

        let commands = match self.link.as_mut() {
            Some(link) => link.drain(),
            None => Vec::new(),
        };
        for command in commands {
            if self.state.phase == Phase::Errored {
                tracing::debug!(
                    command_type = command.command_type(),
                    "Executor errored; dropping command",
                );
                continue;
            }
            self.handle_command(command);
        }

        self.poll_render();
    }

    fn is_busy(&self) -> bool {
        self.state.is_rendering()
    }
}
