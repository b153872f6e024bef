//! Scene loading with a per-process cache.
//!
//! Loading a scene is a blocking operation in the host. [`SceneLoader`]
//! performs it at most once per scene path (policy permitting) and
//! remembers what is currently loaded.

use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::str::FromStr;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;

use crate::process::split_command;

/// Host capability that actually loads a scene.
pub trait SceneHost: Send {
    /// Load `scene_path`, blocking until it is ready.
    fn load_scene(&mut self, scene_path: &str) -> Result<(), SceneLoadError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SceneLoadError {
    #[error("Loading scene {scene} failed: {reason}")]
    Failed { scene: String, reason: String },

    #[error("Could not run scene load command: {0}")]
    Io(#[from] io::Error),
}

/// When a loaded scene is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScenePolicy {
    /// Load again whenever a task needs a different scene.
    #[default]
    ReloadOnPathChange,
    /// Keep the first scene for the whole process lifetime.
    LoadOnce,
}

impl FromStr for ScenePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reload-on-change" | "reload" => Ok(Self::ReloadOnPathChange),
            "load-once" | "once" => Ok(Self::LoadOnce),
            other => Err(format!(
                "unknown scene policy '{other}' (expected 'reload-on-change' or 'load-once')"
            )),
        }
    }
}

/// Result of [`SceneLoader::ensure_loaded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneLoadOutcome {
    /// The host loaded the scene.
    Loaded { elapsed: Duration },
    /// Nothing to do.
    AlreadyLoaded,
}

/// Caches the currently loaded scene in front of a [`SceneHost`].
pub struct SceneLoader {
    host: Box<dyn SceneHost>,
    policy: ScenePolicy,
    loaded: Option<String>,
    load_count: usize,
}

impl SceneLoader {
    pub fn new(host: Box<dyn SceneHost>, policy: ScenePolicy) -> Self {
        Self {
            host,
            policy,
            loaded: None,
            load_count: 0,
        }
    }

    /// Whether [`ensure_loaded`](Self::ensure_loaded) would hit the host.
    pub fn needs_load(&self, scene_path: &str) -> bool {
        match (&self.loaded, self.policy) {
            (None, _) => true,
            (Some(_), ScenePolicy::LoadOnce) => false,
            (Some(current), ScenePolicy::ReloadOnPathChange) => current != scene_path,
        }
    }

    /// Make sure `scene_path` is loaded, blocking while the host loads it.
    ///
    /// A failed load forgets the previously loaded scene, since the host
    /// may have torn it down already.
    pub fn ensure_loaded(&mut self, scene_path: &str) -> Result<SceneLoadOutcome, SceneLoadError> {
        if !self.needs_load(scene_path) {
            if self.loaded.as_deref() != Some(scene_path) {
                tracing::warn!(
                    loaded = ?self.loaded,
                    requested = %scene_path,
                    "Keeping previously loaded scene (load-once policy)",
                );
            }
            return Ok(SceneLoadOutcome::AlreadyLoaded);
        }

        let start = Instant::now();
        if let Err(e) = self.host.load_scene(scene_path) {
            self.loaded = None;
            return Err(e);
        }
        let elapsed = start.elapsed();

        self.loaded = Some(scene_path.to_string());
        self.load_count += 1;
        Ok(SceneLoadOutcome::Loaded { elapsed })
    }

    /// True once any scene has been loaded successfully.
    pub fn has_loaded_once(&self) -> bool {
        self.load_count > 0
    }

    pub fn loaded_scene(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    /// Number of loads performed by the host.
    pub fn load_count(&self) -> usize {
        self.load_count
    }

    pub fn policy(&self) -> ScenePolicy {
        self.policy
    }
}

/// Loads scenes by running an external command with the scene path
/// appended as the last argument.
///
/// Without a command, loading is left to the render command, which
/// receives the scene path in its request. The command is killed when
/// `timeout` elapses or `cancel` fires.
pub struct ProcessSceneHost {
    command: Option<(String, Vec<String>)>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl ProcessSceneHost {
    pub fn new(
        command: Option<&str>,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            command: command.and_then(split_command),
            timeout,
            cancel,
        }
    }

    async fn run_command(
        &self,
        program: &str,
        args: &[String],
        scene_path: &str,
    ) -> Result<ExitStatus, SceneLoadError> {
        let mut child = Command::new(program)
            .args(args)
            .arg(scene_path)
            .kill_on_drop(true)
            .spawn()?;

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        let reason = tokio::select! {
            status = child.wait() => return Ok(status?),
            _ = self.cancel.cancelled() => "cancelled".to_string(),
            _ = deadline => {
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                format!("{program} timed out after {secs}s")
            }
        };
        let _ = child.kill().await;
        Err(SceneLoadError::Failed {
            scene: scene_path.to_string(),
            reason,
        })
    }
}

impl SceneHost for ProcessSceneHost {
    fn load_scene(&mut self, scene_path: &str) -> Result<(), SceneLoadError> {
        let Some((program, args)) = &self.command else {
            tracing::debug!(
                scene = %scene_path,
                "No scene command; render command loads the scene",
            );
            return Ok(());
        };

        let status = block_on(self.run_command(program, args, scene_path))?;
        if status.success() {
            Ok(())
        } else {
            Err(SceneLoadError::Failed {
                scene: scene_path.to_string(),
                reason: format!("{program} exited with {status}"),
            })
        }
    }
}

/// Drive `future` to completion from synchronous code.
///
/// The future gets its own thread and current-thread runtime. Called from
/// a multi-thread runtime, the worker thread is handed over with
/// `block_in_place` so the runtime's other tasks keep making progress.
fn block_on<T, F>(future: F) -> Result<T, SceneLoadError>
where
    T: Send,
    F: Future<Output = Result<T, SceneLoadError>> + Send,
{
    let run = move || {
        std::thread::scope(move |scope| {
            scope
                .spawn(move || {
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()?
                        .block_on(future)
                })
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("scene load thread panicked").into()))
        })
    };

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(run)
        }
        _ => run(),
    }
}
