//! Wire protocol between the browser terminal and the gateway.

use fwconsole_core::{CommandId, CommandResult, CommandStatus};
use serde::{Deserialize, Serialize};

/// Close code when the operator could not be authenticated.
pub const CLOSE_UNAUTHENTICATED: u16 = 4401;
/// Close code when the requested target does not exist.
pub const CLOSE_TARGET_NOT_FOUND: u16 = 4404;
/// Close code for any other failure.
pub const CLOSE_INTERNAL: u16 = 4500;

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open the shell session.
    Connect,
    /// Run one command line.
    Command { command: String },
    /// Step through a paged listing by hand.
    PagerAction { action: PagerAction },
    /// Close the shell session, keeping the socket open.
    Disconnect,
}

/// Manual pager keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagerAction {
    /// Next page, with the device's continuation key.
    Continue,
    /// Next line.
    Line,
    /// Abandon the listing.
    Quit,
}

impl PagerAction {
    /// Keystroke for actions that do not depend on the device.
    #[must_use]
    pub const fn fixed_key(self) -> Option<&'static [u8]> {
        match self {
            Self::Continue => None,
            Self::Line => Some(b"\n"),
            Self::Quit => Some(b"q"),
        }
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Gateway notice, e.g. connection progress.
    System(String),
    /// Device output.
    Output(String),
    Error(String),
    /// Device is paused behind a pager prompt.
    Pager(String),
    /// A command reached a terminal state.
    CommandStatus(CommandStatusContent),
}

/// Body of [`ServerMessage::CommandStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatusContent {
    pub command_id: CommandId,
    pub status: CommandStatus,
    pub error: Option<String>,
}

impl From<&CommandResult> for CommandStatusContent {
    fn from(result: &CommandResult) -> Self {
        Self {
            command_id: result.id,
            status: result.status,
            error: result.error.clone(),
        }
    }
}
