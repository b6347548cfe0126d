//! Remote targets and device profiles.

use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Target identifier, as known to the surrounding inventory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub String);

impl TargetId {
    /// Create a new target identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Login credentials, already decrypted by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub secret: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: SecretString::from(secret.into()),
        }
    }
}

/// Closed set of device families with known CLI conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[serde(rename = "fortigate", alias = "fortinet")]
    FortiGate,
    CiscoAsa,
    PaloAlto,
    /// Fallback for anything else with a conventional `#`/`>`/`$` prompt.
    #[default]
    Generic,
}

impl DeviceKind {
    /// Default prompt patterns, matched against the final unterminated line.
    #[must_use]
    pub fn default_prompt_patterns(self) -> Vec<String> {
        let patterns: &[&str] = match self {
            Self::FortiGate => &[r"^[\w.\-]+( \([\w.\-]+\))? [#$]$"],
            Self::CiscoAsa => &[r"^[\w.\-/]+(\([\w.\-]+\))?[#>]$"],
            Self::PaloAlto => &[r"^[\w.\-]+@[\w.\-()]+[#>]$"],
            Self::Generic => &[r"[#>$%]$"],
        };
        patterns.iter().map(|p| (*p).to_string()).collect()
    }

    /// Default pager markers.
    #[must_use]
    pub fn default_pager_patterns(self) -> Vec<String> {
        let patterns: &[&str] = match self {
            Self::FortiGate => &[r"--More--"],
            Self::CiscoAsa => &[r"<--- More --->"],
            Self::PaloAlto => &[r"(?i)--more--", r"lines \d+-\d+"],
            Self::Generic => &[r"(?i)<?-+ ?more ?-+>?"],
        };
        patterns.iter().map(|p| (*p).to_string()).collect()
    }
}

/// Prompt and pager conventions for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub kind: DeviceKind,
    pub prompt_patterns: Vec<String>,
    pub pager_patterns: Vec<String>,
    /// Keystroke that advances a paged listing.
    pub continuation_key: String,
}

impl DeviceProfile {
    /// Profile with the built-in patterns for `kind`.
    #[must_use]
    pub fn for_kind(kind: DeviceKind) -> Self {
        Self {
            kind,
            prompt_patterns: kind.default_prompt_patterns(),
            pager_patterns: kind.default_pager_patterns(),
            continuation_key: " ".to_string(),
        }
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::for_kind(DeviceKind::Generic)
    }
}

/// Fully-resolved connection target. Immutable for the life of a session.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub id: TargetId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub profile: DeviceProfile,
}

impl RemoteTarget {
    /// `host:port` form used for logging and socket addressing.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
