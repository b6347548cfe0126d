//! Command identity and results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command identifier.
pub type CommandId = Uuid;

/// Terminal state of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// The device returned to its prompt or went quiet after output.
    Completed,
    /// The transport failed while the command was outstanding.
    Failed,
    /// No completion signal within the hard timeout. Output may be partial.
    Timeout,
}

impl CommandStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

/// Outcome of one command. Owned by the caller once handed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: CommandId,
    pub status: CommandStatus,
    /// Cleaned output with the command echo and trailing prompt removed.
    pub output: String,
    pub error: Option<String>,
}

impl CommandResult {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == CommandStatus::Completed
    }
}
