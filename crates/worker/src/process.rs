//! Subprocess-backed render delegate.
//!
//! [`ProcessDelegate`] spawns the configured render command once per
//! shot. The [`RenderRequest`] is written to the child's stdin as JSON,
//! the initialization time and global shot index are also exported as
//! environment variables, and stdout lines of the form
//! `PROGRESS <fraction>` are forwarded as progress. Exit status zero is
//! success; anything else, an abort, or the optional timeout is fatal.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

use crate::delegate::{
    render_channel, DelegateError, RenderDelegate, RenderHandle, RenderOutcome, RenderReporter,
    RenderRequest,
};

/// Environment variable carrying the job initialization time (RFC 3339).
pub const ENV_INIT_TIME: &str = "SHOTFARM_INIT_TIME";
/// Environment variable carrying the global shot index.
pub const ENV_SHOT_INDEX: &str = "SHOTFARM_SHOT_INDEX";
/// Environment variable carrying the scene path.
pub const ENV_SCENE: &str = "SHOTFARM_SCENE";

const PROGRESS_PREFIX: &str = "PROGRESS";

/// How long output is still read after the render command exits.
const STDOUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Split a command line on whitespace into program and arguments.
pub fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

/// Parse a `PROGRESS <fraction>` line.
pub fn parse_progress_line(line: &str) -> Option<f32> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let value: f32 = rest.trim().parse().ok()?;
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

/// Runs one render command per shot.
#[derive(Debug, Clone)]
pub struct ProcessDelegate {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessDelegate {
    pub fn new(command: &str, timeout: Option<Duration>) -> Result<Self, DelegateError> {
        let (program, args) = split_command(command)
            .ok_or_else(|| DelegateError::Spawn("render command is empty".into()))?;
        Ok(Self {
            program,
            args,
            timeout,
        })
    }
}

impl RenderDelegate for ProcessDelegate {
    fn execute(&mut self, request: RenderRequest) -> Result<RenderHandle, DelegateError> {
        let payload = serde_json::to_vec(&request)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(ENV_INIT_TIME, request.initialization_time.to_rfc3339())
            .env(ENV_SHOT_INDEX, request.global_shot_index.to_string())
            .env(ENV_SCENE, &request.scene_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| DelegateError::Spawn(format!("{}: {e}", self.program)))?;

        tracing::info!(
            program = %self.program,
            shot = request.global_shot_index,
            pid = ?child.id(),
            "Render process started",
        );

        let (handle, reporter) = render_channel();
        tokio::spawn(supervise(
            child,
            payload,
            reporter,
            self.timeout,
            request.global_shot_index,
        ));
        Ok(handle)
    }
}

/// Feed the child its request, forward its output, and report how it ended.
async fn supervise(
    mut child: Child,
    payload: Vec<u8>,
    reporter: RenderReporter,
    timeout: Option<Duration>,
    shot: usize,
) {
    let start = Instant::now();

    if let Some(mut stdin) = child.stdin.take() {
        // The child may never read stdin; killing it closes the pipe and
        // ends this write.
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::debug!(shot, error = %e, "Render request not fully written to stdin");
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(shot, line = %line, "Render stderr");
            }
        });
    }

    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let abort = reporter.abort_token();
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            _ = abort.cancelled() => {
                let _ = child.kill().await;
                break RenderOutcome::failed("Render aborted");
            }
            _ = &mut deadline => {
                let _ = child.kill().await;
                let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
                break RenderOutcome::failed(format!("Render timed out after {secs}s"));
            }
            line = next_line(&mut stdout), if stdout.is_some() => match line {
                Some(line) => forward_line(&line, &reporter, shot),
                None => stdout = None,
            },
            status = child.wait() => {
                drain_after_exit(&mut stdout, &reporter, &abort, shot).await;
                break match status {
                    Ok(status) if status.success() => RenderOutcome::success(),
                    Ok(status) => {
                        RenderOutcome::failed(format!("Render command exited with {status}"))
                    }
                    Err(e) => {
                        RenderOutcome::failed(format!("Failed to wait for render command: {e}"))
                    }
                };
            }
        }
    };

    tracing::info!(
        shot,
        fatal = outcome.fatal_error,
        duration_ms = start.elapsed().as_millis() as u64,
        "Render process finished",
    );
    reporter.finish(outcome);
}

/// Pick up output written just before exit.
///
/// A process the child left running in the background can hold stdout
/// open indefinitely, so the drain is bounded by [`STDOUT_DRAIN_GRACE`]
/// and by `abort`.
async fn drain_after_exit(
    stdout: &mut Option<Lines<BufReader<ChildStdout>>>,
    reporter: &RenderReporter,
    abort: &CancellationToken,
    shot: usize,
) {
    let drain = async {
        while let Some(line) = next_line(stdout).await {
            forward_line(&line, reporter, shot);
        }
    };
    tokio::select! {
        _ = drain => {}
        _ = abort.cancelled() => {}
        _ = tokio::time::sleep(STDOUT_DRAIN_GRACE) => {
            tracing::warn!(shot, "Render stdout still open after exit; not waiting for it");
        }
    }
}

/// Next stdout line, or `None` once the stream is exhausted or unreadable.
async fn next_line(stdout: &mut Option<Lines<BufReader<ChildStdout>>>) -> Option<String> {
    match stdout {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

fn forward_line(line: &str, reporter: &RenderReporter, shot: usize) {
    match parse_progress_line(line) {
        Some(fraction) => reporter.set_progress(fraction),
        None => tracing::debug!(shot, line = %line, "Render stdout"),
    }
}
