use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shotfarm_core::{ConfigOverrides, Resolution};
use shotfarm_remote::client::{DEFAULT_HOST, DEFAULT_PORT};

use crate::scene::ScenePolicy;

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for a worker running next to its
/// dispatcher on the same machine.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Dispatcher host (default: `127.0.0.1`).
    pub dispatcher_host: String,
    /// Dispatcher port (default: `6783`).
    pub dispatcher_port: u16,
    pub connect_timeout: Duration,
    /// Connection attempts before falling back to degraded mode.
    pub connect_attempts: u32,
    /// Upper bound on one socket write to the dispatcher.
    pub send_timeout: Duration,
    pub tick_interval: Duration,
    /// Root that relative manifest references resolve against.
    pub content_root: Option<PathBuf>,
    pub scene_policy: ScenePolicy,
    /// Command run (with the scene path appended) to load a scene.
    pub scene_command: Option<String>,
    /// Upper bound on one run of the scene load command.
    pub scene_timeout: Option<Duration>,
    /// Command run once per shot to render it.
    pub render_command: String,
    pub render_timeout: Option<Duration>,
    /// Applied to every solo queue before it is handed to the renderer.
    pub overrides: ConfigOverrides,
    /// Task failures in a row before the executor gives up.
    pub max_consecutive_failures: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dispatcher_host: DEFAULT_HOST.into(),
            dispatcher_port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            connect_attempts: 1,
            send_timeout: Duration::from_millis(2000),
            tick_interval: Duration::from_millis(33),
            content_root: None,
            scene_policy: ScenePolicy::default(),
            scene_command: None,
            scene_timeout: None,
            render_command: "shotfarm-render".into(),
            render_timeout: None,
            overrides: ConfigOverrides::default(),
            max_consecutive_failures: 3,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default            |
    /// |----------------------------|--------------------|
    /// | `DISPATCHER_HOST`          | `127.0.0.1`        |
    /// | `DISPATCHER_PORT`          | `6783`             |
    /// | `CONNECT_TIMEOUT_SECS`     | `5`                |
    /// | `CONNECT_ATTEMPTS`         | `1`                |
    /// | `SEND_TIMEOUT_MS`          | `2000`             |
    /// | `TICK_INTERVAL_MS`         | `33`               |
    /// | `CONTENT_ROOT`             | unset              |
    /// | `SCENE_POLICY`             | `reload-on-change` |
    /// | `SCENE_COMMAND`            | unset              |
    /// | `SCENE_TIMEOUT_SECS`       | unset              |
    /// | `RENDER_COMMAND`           | `shotfarm-render`  |
    /// | `RENDER_TIMEOUT_SECS`      | unset              |
    /// | `OUTPUT_DIRECTORY`         | unset              |
    /// | `OUTPUT_RESOLUTION`        | unset (`WxH`)      |
    /// | `MAX_CONSECUTIVE_FAILURES` | `3`                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let resolution = var("OUTPUT_RESOLUTION")
            .map(|raw| parse_value::<Resolution>("OUTPUT_RESOLUTION", raw))
            .transpose()?;

        Ok(Self {
            dispatcher_host: var("DISPATCHER_HOST").unwrap_or(defaults.dispatcher_host),
            dispatcher_port: parse_or(
                "DISPATCHER_PORT",
                var("DISPATCHER_PORT"),
                defaults.dispatcher_port,
            )?,
            connect_timeout: Duration::from_secs(parse_or(
                "CONNECT_TIMEOUT_SECS",
                var("CONNECT_TIMEOUT_SECS"),
                defaults.connect_timeout.as_secs(),
            )?),
            connect_attempts: parse_or(
                "CONNECT_ATTEMPTS",
                var("CONNECT_ATTEMPTS"),
                defaults.connect_attempts,
            )?,
            send_timeout: Duration::from_millis(parse_or(
                "SEND_TIMEOUT_MS",
                var("SEND_TIMEOUT_MS"),
                defaults.send_timeout.as_millis() as u64,
            )?),
            tick_interval: Duration::from_millis(
                parse_or(
                    "TICK_INTERVAL_MS",
                    var("TICK_INTERVAL_MS"),
                    defaults.tick_interval.as_millis() as u64,
                )?
                .max(1),
            ),
            content_root: var("CONTENT_ROOT").map(PathBuf::from),
            scene_policy: parse_or("SCENE_POLICY", var("SCENE_POLICY"), defaults.scene_policy)?,
            scene_command: var("SCENE_COMMAND"),
            scene_timeout: var("SCENE_TIMEOUT_SECS")
                .map(|raw| parse_value::<u64>("SCENE_TIMEOUT_SECS", raw))
                .transpose()?
                .map(Duration::from_secs),
            render_command: var("RENDER_COMMAND").unwrap_or(defaults.render_command),
            render_timeout: var("RENDER_TIMEOUT_SECS")
                .map(|raw| parse_value::<u64>("RENDER_TIMEOUT_SECS", raw))
                .transpose()?
                .map(Duration::from_secs),
            overrides: ConfigOverrides {
                output_directory: var("OUTPUT_DIRECTORY"),
                resolution,
            },
            max_consecutive_failures: parse_or(
                "MAX_CONSECUTIVE_FAILURES",
                var("MAX_CONSECUTIVE_FAILURES"),
                defaults.max_consecutive_failures,
            )?
            .max(1),
        })
    }

    /// `host:port` of the dispatcher.
    pub fn dispatcher_endpoint(&self) -> String {
        format!("{}:{}", self.dispatcher_host, self.dispatcher_port)
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map_or(Ok(default), |raw| parse_value(var, raw))
}

fn parse_value<T>(var: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value: raw,
    })
}
