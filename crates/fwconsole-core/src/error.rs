//! Connection error taxonomy shared by transports and their callers.

use std::time::Duration;

use thiserror::Error;

/// Why a session could not be established.
///
/// Fatal to the session attempt; the core never retries on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Authentication failed for {username}@{address}")]
    Authentication { username: String, address: String },
    #[error("Network error reaching {address}: {reason}")]
    Network { address: String, reason: String },
    #[error("Timed out after {timeout:?} connecting to {address}")]
    Timeout { address: String, timeout: Duration },
    #[error("Shell setup failed on {address}: {reason}")]
    Protocol { address: String, reason: String },
}

impl ConnectError {
    /// Authentication failures are the only kind a reconnect will not fix.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}
