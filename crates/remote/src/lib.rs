//! Farm dispatcher remote-control protocol.
//!
//! Provides the typed command codec, the TCP client, the
//! non-blocking command channel used by the controller's tick loop,
//! and reconnection backoff for the dispatcher link.

pub mod channel;
pub mod client;
pub mod messages;
pub mod reconnect;

pub use channel::{ChannelConfig, ChannelError, ChannelTasks, DispatcherLink, RemoteChannel};
pub use client::{RemoteClient, RemoteClientError, RemoteConnection};
pub use messages::{RemoteCommand, Severity};
