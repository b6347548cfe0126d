//! Interface records produced by the output parsers.

use fwconsole_core::TargetId;
use serde::{Deserialize, Serialize};

/// Link state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Up,
    /// Enabled but without link.
    Down,
    /// Shut down on purpose. Not treated as a fault.
    AdminDown,
    Unknown,
}

impl LinkStatus {
    /// Map a device status word.
    #[must_use]
    pub fn from_word(word: &str) -> Self {
        let word = word.trim().to_ascii_lowercase();
        match word.as_str() {
            "up" | "connected" => Self::Up,
            "down" | "disconnected" | "notconnect" => Self::Down,
            "administratively down" | "admin-down" | "admin down" | "disabled" => Self::AdminDown,
            _ => Self::Unknown,
        }
    }
}

/// One interface as parsed from command output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub name: String,
    pub status: LinkStatus,
    pub speed: Option<String>,
    pub address: Option<String>,
}

impl InterfaceRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, status: LinkStatus) -> Self {
        Self {
            name: name.into(),
            status,
            speed: None,
            address: None,
        }
    }

    /// Whether this interface counts towards the down-set.
    #[must_use]
    pub fn is_down(&self) -> bool {
        self.status == LinkStatus::Down
    }
}

/// Down-set key: `"{target}/{interface}"`.
#[must_use]
pub fn down_key(target: &TargetId, interface: &str) -> String {
    format!("{target}/{interface}")
}

/// A down interface on one target, as handed to notifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownInterface {
    pub target_id: TargetId,
    pub name: String,
    pub address: Option<String>,
    /// Carried over from the previous cycle because the target could not be
    /// polled this time.
    pub stale: bool,
}

impl DownInterface {
    #[must_use]
    pub fn key(&self) -> String {
        down_key(&self.target_id, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_words() {
        assert_eq!(LinkStatus::from_word("UP"), LinkStatus::Up);
        assert_eq!(LinkStatus::from_word("down "), LinkStatus::Down);
        assert_eq!(LinkStatus::from_word("administratively down"), LinkStatus::AdminDown);
        assert_eq!(LinkStatus::from_word("testing"), LinkStatus::Unknown);
    }

    #[test]
    fn test_admin_down_is_not_a_fault() {
        assert!(InterfaceRecord::new("port1", LinkStatus::Down).is_down());
        assert!(!InterfaceRecord::new("port2", LinkStatus::AdminDown).is_down());
        assert!(!InterfaceRecord::new("port3", LinkStatus::Unknown).is_down());
    }

    #[test]
    fn test_down_key_format() {
        let iface = DownInterface {
            target_id: TargetId::new("fw-01"),
            name: "port1".into(),
            address: None,
            stale: false,
        };
        assert_eq!(iface.key(), "fw-01/port1");
    }
}
