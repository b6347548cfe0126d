//! Engine tunables.
//!
//! Interactive terminals and the background poller want different timing, so
//! both presets are exposed instead of a single default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the engine does when the device pauses output behind a pager prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagerPolicy {
    /// Send the continuation key automatically.
    #[default]
    Auto,
    /// Report the pager and wait for the caller to send a key.
    Manual,
}

/// Per-session timing and buffering configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Idle time after the last byte that counts as command completion.
    #[serde(with = "millis", rename = "quiet_window_ms")]
    pub quiet_window: Duration,
    /// Hard upper bound on a single command.
    #[serde(with = "millis", rename = "command_timeout_ms")]
    pub command_timeout: Duration,
    /// Longest a single transport read waits for data.
    #[serde(with = "millis", rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    /// Streaming flush cadence.
    #[serde(with = "millis", rename = "flush_interval_ms")]
    pub flush_interval: Duration,
    /// Largest piece of text handed to a consumer at once, in bytes.
    pub max_chunk_size: usize,
    /// Bound on establishing the transport.
    #[serde(with = "millis", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    pub pager_policy: PagerPolicy,
}

impl EngineConfig {
    /// Timing for a human at a browser terminal.
    #[must_use]
    pub const fn interactive() -> Self {
        Self {
            quiet_window: Duration::from_millis(800),
            command_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(20),
            flush_interval: Duration::from_millis(50),
            max_chunk_size: 16 * 1024,
            connect_timeout: Duration::from_secs(10),
            pager_policy: PagerPolicy::Auto,
        }
    }

    /// Timing for unattended polling, where slow devices matter more than latency.
    #[must_use]
    pub const fn polling() -> Self {
        Self {
            quiet_window: Duration::from_millis(1500),
            command_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(50),
            flush_interval: Duration::from_millis(50),
            max_chunk_size: 16 * 1024,
            connect_timeout: Duration::from_secs(15),
            pager_policy: PagerPolicy::Auto,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a duration as milliseconds.
    ///
    /// # Errors
    /// Returns the serializer's error.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize milliseconds into a duration.
    ///
    /// # Errors
    /// Returns the deserializer's error.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serde adapter storing a [`Duration`] as whole seconds.
pub mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a duration as seconds.
    ///
    /// # Errors
    /// Returns the serializer's error.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    /// Deserialize seconds into a duration.
    ///
    /// # Errors
    /// Returns the deserializer's error.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
