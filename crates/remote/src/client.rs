//! TCP client for the dispatcher's remote-control listener.
//!
//! [`RemoteClient`] holds the endpoint configuration. Call
//! [`RemoteClient::connect`] to establish a live [`RemoteConnection`],
//! a newline-framed TCP stream.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

/// Loopback host the dispatcher listens on.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port the dispatcher listens on.
pub const DEFAULT_PORT: u16 = 6783;

/// Upper bound on one framed message.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Newline-delimited JSON stream to the dispatcher.
pub type CommandStream = Framed<TcpStream, LinesCodec>;

/// Configuration handle for the dispatcher endpoint.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

/// A live connection to the dispatcher.
pub struct RemoteConnection {
    /// `host:port` this connection was opened to.
    pub endpoint: String,
    pub stream: CommandStream,
}

impl RemoteClient {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }

    /// `host:port` of the dispatcher listener.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open the TCP connection, bounded by the connect timeout.
    pub async fn connect(&self) -> Result<RemoteConnection, RemoteClientError> {
        let endpoint = self.endpoint();

        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| RemoteClientError::Timeout {
                endpoint: endpoint.clone(),
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| {
                RemoteClientError::Connection(format!(
                    "Failed to connect to dispatcher at {endpoint}: {e}"
                ))
            })?;

        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(error = %e, "Could not disable Nagle on dispatcher socket");
        }

        tracing::info!(endpoint = %endpoint, "Connected to dispatcher");

        Ok(RemoteConnection {
            endpoint,
            stream: Framed::new(tcp, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
        })
    }
}

impl Default for RemoteClient {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT, Duration::from_secs(5))
    }
}

/// Errors that can occur when connecting to the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum RemoteClientError {
    /// Failed to establish the TCP connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection attempt did not complete in time.
    #[error("Connecting to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_is_loopback() {
        assert_eq!(RemoteClient::default().endpoint(), "127.0.0.1:6783");
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        // Bind then drop a listener so the port is very likely closed.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = RemoteClient::new("127.0.0.1", port, Duration::from_secs(2));
        assert!(client.connect().await.is_err());
    }
}
