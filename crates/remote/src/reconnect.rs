//! Exponential-backoff connection attempts to the dispatcher.
//!
//! The dispatcher plugin may open its listener slightly after the
//! controller starts. [`connect_with_retry`] keeps trying with growing
//! delays until a connection succeeds, the attempt budget runs out, or
//! the [`CancellationToken`] is triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{RemoteClient, RemoteConnection};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 1,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Connect to the dispatcher, retrying with exponential backoff.
///
/// Returns `None` if every attempt failed or `cancel` fired first.
pub async fn connect_with_retry(
    client: &RemoteClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<RemoteConnection> {
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;

    for attempt in 1..=max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(endpoint = %client.endpoint(), "Dispatcher connect cancelled");
                return None;
            }
            result = client.connect() => {
                match result {
                    Ok(conn) => {
                        if attempt > 1 {
                            tracing::info!(
                                endpoint = %client.endpoint(),
                                attempt,
                                "Connected after retry",
                            );
                        }
                        return Some(conn);
                    }
                    Err(e) => {
                        tracing::warn!(
                            endpoint = %client.endpoint(),
                            error = %e,
                            "Connect attempt {attempt}/{max_attempts} failed",
                        );
                    }
                }
            }
        }

        if attempt == max_attempts {
            break;
        }

        tracing::info!(delay_ms = delay.as_millis() as u64, "Retrying dispatcher connection");
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = next_delay(delay, config);
    }

    None
}
