//! Transport contract between the engine and a remote shell.

use std::sync::Arc;

use async_trait::async_trait;
use fwconsole_core::{ConnectError, RemoteTarget};
use thiserror::Error;

/// Mid-session transport failure. The session is unusable afterwards.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Shell channel closed")]
    Closed,
    #[error("Shell I/O error: {0}")]
    Io(String),
}

/// One interactive shell on a remote device.
///
/// Implementations are shared between a reader task and writers, so every
/// method takes `&self`.
#[async_trait]
pub trait ShellTransport: Send + Sync {
    /// Send raw bytes to the shell. Never retried.
    ///
    /// # Errors
    /// Returns error if the shell is closed or failed.
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Return up to `max_bytes` of pending output.
    ///
    /// Waits no longer than the transport's poll interval. An empty vector
    /// means nothing arrived, not an error.
    ///
    /// # Errors
    /// Returns error once the shell has ended and all buffered bytes were read.
    async fn read_available(&self, max_bytes: usize) -> Result<Vec<u8>, TransportError>;

    /// Tear the shell down. Calling it again is a no-op.
    async fn close(&self);

    /// Whether the shell is still usable.
    fn is_open(&self) -> bool;
}

/// Opens shells on remote targets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Authenticate and start an interactive PTY shell.
    ///
    /// # Errors
    /// Returns a [`ConnectError`] describing why the session could not start.
    async fn connect(&self, target: &RemoteTarget)
    -> Result<Arc<dyn ShellTransport>, ConnectError>;
}
