//! Gateway errors.

use fwconsole_core::{StoreError, TargetId};
use fwconsole_engine::EngineError;
use thiserror::Error;

use crate::protocol::{CLOSE_INTERNAL, CLOSE_TARGET_NOT_FOUND, CLOSE_UNAUTHENTICATED};

/// Gateway error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("Target not found: {0}")]
    TargetNotFound(TargetId),
    #[error("Not connected")]
    NotConnected,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("A command is already running")]
    Busy,
    #[error(transparent)]
    Engine(EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<EngineError> for GatewayError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Busy => Self::Busy,
            EngineError::SessionClosed => Self::NotConnected,
            other => Self::Engine(other),
        }
    }
}

impl GatewayError {
    /// WebSocket close code for errors that end the socket.
    #[must_use]
    pub const fn close_code(&self) -> u16 {
        match self {
            Self::Unauthenticated => CLOSE_UNAUTHENTICATED,
            Self::TargetNotFound(_) => CLOSE_TARGET_NOT_FOUND,
            _ => CLOSE_INTERNAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes() {
        assert_eq!(GatewayError::Unauthenticated.close_code(), 4401);
        assert_eq!(GatewayError::TargetNotFound(TargetId::new("fw-9")).close_code(), 4404);
        assert_eq!(GatewayError::Store(StoreError::Internal("poisoned".into())).close_code(), 4500);
    }

    #[test]
    fn test_engine_errors_map_to_operator_messages() {
        assert_eq!(GatewayError::from(EngineError::Busy).to_string(), "A command is already running");
        assert!(matches!(GatewayError::from(EngineError::SessionClosed), GatewayError::NotConnected));
    }
}
