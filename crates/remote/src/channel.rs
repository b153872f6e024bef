//! Remote control channel.
//!
//! Splits a [`RemoteConnection`] into a reader task and a writer task so
//! that the controller's tick never waits on the socket:
//!
//! - the reader parses inbound lines into [`RemoteCommand`]s and queues
//!   them until the controller calls [`DispatcherLink::drain`];
//! - the writer takes encoded commands from a bounded queue filled by
//!   [`DispatcherLink::send`] and writes them, each write bounded by the
//!   configured send timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{CommandStream, RemoteConnection};
use crate::messages::{encode_command, parse_command, RemoteCommand};

/// Outbound commands buffered before `send` reports the channel full.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// How long [`ChannelTasks::close`] waits for each task.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// The controller's view of the dispatcher.
///
/// Implemented by the socket-backed [`RemoteChannel`] and by in-process
/// stand-ins (local queue mode, tests).
pub trait DispatcherLink: Send {
    /// Queue a command for delivery. Must not block.
    fn send(&mut self, command: RemoteCommand) -> Result<(), ChannelError>;

    /// Take every command received since the previous call.
    fn drain(&mut self) -> Vec<RemoteCommand>;

    /// Whether commands sent now can still reach the dispatcher.
    fn is_connected(&self) -> bool;
}

/// Tunables for a [`RemoteChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Upper bound on a single socket write.
    pub send_timeout: Duration,
    pub outbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(2),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Errors reported when handing a command to the channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The connection is gone; the command was not queued.
    #[error("Dispatcher channel is closed")]
    Closed,

    /// The outbound buffer is full; the command was dropped.
    #[error("Dispatcher channel outbound buffer is full")]
    Full,

    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Socket-backed [`DispatcherLink`].
///
/// Dropping it closes the outbound queue; the writer task then flushes
/// what is left and exits. Use [`ChannelTasks::close`] to wait for that.
pub struct RemoteChannel {
    endpoint: String,
    inbound: mpsc::UnboundedReceiver<RemoteCommand>,
    outbound: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
}

/// Background tasks behind a [`RemoteChannel`].
pub struct ChannelTasks {
    endpoint: String,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RemoteChannel {
    /// Spawn the reader and writer tasks for `connection`.
    ///
    /// Must be called from within a Tokio runtime. `cancel` stops the
    /// reader; the writer stops once the channel is dropped and every
    /// queued command is flushed.
    pub fn open(
        connection: RemoteConnection,
        config: ChannelConfig,
        cancel: CancellationToken,
    ) -> (Self, ChannelTasks) {
        let RemoteConnection { endpoint, stream } = connection;
        let (sink, stream) = stream.split();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_commands(
            stream,
            inbound_tx,
            Arc::clone(&connected),
            cancel.clone(),
        ));
        let writer = tokio::spawn(write_commands(
            sink,
            outbound_rx,
            Arc::clone(&connected),
            config.send_timeout,
        ));

        let channel = Self {
            endpoint: endpoint.clone(),
            inbound,
            outbound,
            connected,
        };
        let tasks = ChannelTasks {
            endpoint,
            cancel,
            reader,
            writer,
        };
        (channel, tasks)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ChannelTasks {
    /// Wait for the writer to flush, then stop the reader.
    ///
    /// The owning [`RemoteChannel`] must have been dropped already,
    /// otherwise the writer only stops at the timeout.
    pub async fn close(self) {
        tracing::info!(endpoint = %self.endpoint, "Closing dispatcher channel");
        if tokio::time::timeout(CLOSE_TIMEOUT, self.writer).await.is_err() {
            tracing::warn!(endpoint = %self.endpoint, "Writer did not flush before timeout");
        }
        self.cancel.cancel();
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.reader).await;
    }
}

impl DispatcherLink for RemoteChannel {
    fn send(&mut self, command: RemoteCommand) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Closed);
        }
        let line = encode_command(&command)?;
        self.outbound.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Full,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }

    fn drain(&mut self) -> Vec<RemoteCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.inbound.try_recv() {
            commands.push(command);
        }
        commands
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Read lines until the socket closes, errors, or `cancel` fires.
async fn read_commands(
    mut stream: SplitStream<CommandStream>,
    inbound: mpsc::UnboundedSender<RemoteCommand>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(line)) => handle_line(&line, &inbound),
            Some(Err(e)) => {
                tracing::error!(error = %e, "Dispatcher receive error");
                break;
            }
            None => {
                tracing::info!("Dispatcher closed the connection");
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
}

/// Parse one inbound line and queue it for the controller.
fn handle_line(line: &str, inbound: &mpsc::UnboundedSender<RemoteCommand>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match parse_command(line) {
        Ok(command) => {
            tracing::debug!(command_type = command.command_type(), "Received dispatcher command");
            // The receiver only disappears when the channel is dropped.
            let _ = inbound.send(command);
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw_message = %line,
                "Failed to parse dispatcher command",
            );
        }
    }
}

/// Write queued lines until the queue is closed or a write fails.
async fn write_commands(
    mut sink: SplitSink<CommandStream, String>,
    mut outbound: mpsc::Receiver<String>,
    connected: Arc<AtomicBool>,
    send_timeout: Duration,
) {
    while let Some(line) = outbound.recv().await {
        match tokio::time::timeout(send_timeout, sink.send(line)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Dispatcher send error");
                break;
            }
            Err(_) => {
                tracing::error!(
                    timeout_ms = send_timeout.as_millis() as u64,
                    "Dispatcher send timed out",
                );
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
    let _ = sink.close().await;
}
