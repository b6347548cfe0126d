//! Alert definitions and their per-definition run state.

use std::{collections::BTreeSet, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeviceKind, TargetId, config::seconds};

/// Alert definition identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub String);

impl std::fmt::Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maintenance period during which notifications are withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilenceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SilenceWindow {
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// What to poll, how to read it and who to tell.
///
/// Owned by an external store; the scheduler only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDefinition {
    pub id: AlertId,
    pub name: String,
    pub targets: Vec<TargetId>,
    /// Commands run in order on one shell; their output is parsed together.
    pub commands: Vec<String>,
    /// Parser used for the combined output.
    #[serde(default)]
    pub device_kind: DeviceKind,
    /// Interfaces to watch. Empty means all.
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(with = "seconds", rename = "check_interval_secs")]
    pub check_interval: Duration,
    #[serde(with = "seconds", rename = "cooldown_secs", default)]
    pub cooldown: Duration,
    #[serde(default)]
    pub silence: Option<SilenceWindow>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl AlertDefinition {
    /// Whether an interface name passes the definition's filter.
    #[must_use]
    pub fn watches(&self, interface: &str) -> bool {
        self.interfaces.is_empty() || self.interfaces.iter().any(|i| i == interface)
    }
}

/// Mutable scheduling state, written once per completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRunState {
    /// Down-set as of the last notification (or recovery).
    pub last_down_set: BTreeSet<String>,
    pub last_sent_at: Option<DateTime<Utc>>,
    /// `None` means due immediately.
    pub next_check_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl AlertRunState {
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_check_at.is_none_or(|next| next <= now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_silence_window_is_half_open() {
        let window = SilenceWindow { start: at(100), end: at(200) };
        assert!(!window.contains(at(99)));
        assert!(window.contains(at(100)));
        assert!(window.contains(at(199)));
        assert!(!window.contains(at(200)));
    }

    #[test]
    fn test_fresh_run_state_is_due() {
        let state = AlertRunState::default();
        assert!(state.is_due(at(0)));

        let state = AlertRunState {
            next_check_at: Some(at(50)),
            ..AlertRunState::default()
        };
        assert!(!state.is_due(at(49)));
        assert!(state.is_due(at(50)));
    }

    #[test]
    fn test_definition_parses_with_defaults() {
        let def: AlertDefinition = serde_json::from_value(serde_json::json!({
            "id": "edge",
            "name": "Edge links",
            "targets": ["fw-1"],
            "commands": ["get system interface physical"],
            "device_kind": "fortigate",
            "check_interval_secs": 300
        }))
        .unwrap();
        assert!(def.active);
        assert!(def.watches("port1"));
        assert_eq!(def.check_interval, Duration::from_secs(300));
        assert_eq!(def.cooldown, Duration::ZERO);
    }
}
