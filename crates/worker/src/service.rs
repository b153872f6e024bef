//! Worker service loop.
//!
//! Wires the executor to its dispatcher link and drives it from a fixed
//! tick until the executor errors out, the local queue is exhausted, or
//! the process is asked to stop.

use std::path::PathBuf;

use shotfarm_core::manifest::ManifestLoader;
use shotfarm_remote::reconnect::{connect_with_retry, ReconnectConfig};
use shotfarm_remote::{ChannelConfig, ChannelTasks, RemoteChannel, RemoteClient};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::config::WorkerConfig;
use crate::delegate::RenderDelegate;
use crate::executor::{ExecutorSettings, QueueExecutor, RenderExecutor};
use crate::local::{LocalDispatch, LocalProgress};
use crate::process::ProcessDelegate;
use crate::scene::{ProcessSceneHost, SceneLoader};

/// Invocation options taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub manifest: Option<PathBuf>,
    pub local: bool,
}

impl From<Cli> for RunOptions {
    fn from(cli: Cli) -> Self {
        Self {
            manifest: cli.manifest,
            local: cli.local,
        }
    }
}

/// Why the service loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceExit {
    /// The executor reached `Errored`.
    Errored,
    /// Shutdown was requested from outside.
    Interrupted,
    /// Local mode rendered every shot.
    QueueComplete { failed: usize },
}

impl ServiceExit {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Errored => 1,
            Self::Interrupted => 0,
            Self::QueueComplete { failed: 0 } => 0,
            Self::QueueComplete { .. } => 1,
        }
    }
}

/// Run the worker with the subprocess-backed scene host and delegate.
pub async fn run(
    config: &WorkerConfig,
    options: RunOptions,
    cancel: CancellationToken,
) -> ServiceExit {
    let delegate = match ProcessDelegate::new(&config.render_command, config.render_timeout) {
        Ok(delegate) => delegate,
        Err(e) => {
            tracing::error!(error = %e, "Invalid RENDER_COMMAND");
            return ServiceExit::Errored;
        }
    };
    let host = ProcessSceneHost::new(
        config.scene_command.as_deref(),
        config.scene_timeout,
        cancel.clone(),
    );
    let scenes = SceneLoader::new(Box::new(host), config.scene_policy);
    run_with(config, options, scenes, Box::new(delegate), cancel).await
}

/// Run the worker with the given scene loader and delegate.
pub async fn run_with(
    config: &WorkerConfig,
    options: RunOptions,
    scenes: SceneLoader,
    delegate: Box<dyn RenderDelegate>,
    cancel: CancellationToken,
) -> ServiceExit {
    let mut executor = QueueExecutor::new(scenes, delegate, ExecutorSettings::from(config));
    let loader = ManifestLoader::new(config.content_root.clone());

    if let Err(e) = executor.initialize(options.manifest.as_deref(), &loader) {
        tracing::error!(error = %e, "Executor failed to initialize");
        return ServiceExit::Errored;
    }

    let mut local_progress: Option<LocalProgress> = None;
    let mut channel_tasks: Option<ChannelTasks> = None;

    if options.local {
        let total = executor.queue().map(|q| q.total_shots()).unwrap_or_default();
        let (link, progress) = LocalDispatch::new(total, chrono::Utc::now());
        tracing::info!(shots = total, "Running queue locally without a dispatcher");
        executor.attach_link(Box::new(link));
        local_progress = Some(progress);
    } else {
        channel_tasks = connect_dispatcher(config, &mut executor, &cancel).await;
    }

    executor.announce_ready();

    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let exit = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Shutdown requested");
                executor.shutdown();
                break ServiceExit::Interrupted;
            }
            _ = ticker.tick() => {
                executor.on_tick();
                if executor.shutdown_requested() {
                    break ServiceExit::Errored;
                }
                if let Some(progress) = &local_progress {
                    if progress.is_finished() && !executor.is_busy() {
                        tracing::info!(
                            succeeded = progress.succeeded(),
                            failed = progress.failed(),
                            "Local queue complete",
                        );
                        break ServiceExit::QueueComplete { failed: progress.failed() };
                    }
                }
            }
        }
    };

    // Dropping the executor drops the channel, which lets the writer
    // flush the final status before the tasks are closed.
    drop(executor);
    if let Some(tasks) = channel_tasks {
        tasks.close().await;
    }
    exit
}

/// Connect to the dispatcher and attach the channel to `executor`.
///
/// A failed connection leaves the executor without a link.
async fn connect_dispatcher(
    config: &WorkerConfig,
    executor: &mut QueueExecutor,
    cancel: &CancellationToken,
) -> Option<ChannelTasks> {
    let client = RemoteClient::new(
        config.dispatcher_host.clone(),
        config.dispatcher_port,
        config.connect_timeout,
    );
    let reconnect = ReconnectConfig {
        max_attempts: config.connect_attempts,
        ..Default::default()
    };

    let Some(connection) = connect_with_retry(&client, &reconnect, cancel).await else {
        tracing::warn!(
            endpoint = %client.endpoint(),
            "Could not reach dispatcher; rendering without remote reporting",
        );
        return None;
    };

    let channel_config = ChannelConfig {
        send_timeout: config.send_timeout,
        ..Default::default()
    };
    let (channel, tasks) = RemoteChannel::open(connection, channel_config, cancel.child_token());
    executor.attach_link(Box::new(channel));
    Some(tasks)
}
