//! Browser terminal gateway onto firewall CLI sessions.
//!
//! Provides:
//! - Wire protocol (JSON, `type`-tagged)
//! - `TerminalSession` - per-operator state machine over a `CommandEngine`
//! - WebSocket transport (feature: websocket)

pub mod auth;
pub mod error;
pub mod protocol;
pub mod session;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use auth::OperatorAuthenticator;
pub use error::GatewayError;
pub use protocol::{ClientMessage, CommandStatusContent, PagerAction, ServerMessage};
pub use session::TerminalSession;

#[cfg(feature = "websocket")]
pub use websocket::{GatewayState, router};
