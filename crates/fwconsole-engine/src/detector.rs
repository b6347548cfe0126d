//! Decides when an outstanding command is finished.
//!
//! The detector is pure: it looks at the accumulated output and timing and
//! returns a verdict. Checks run in a fixed order, first match wins:
//! pager marker, prompt on the final line, quiet window, hard timeout.

use std::{sync::Arc, time::Duration};

use fwconsole_core::EngineConfig;

use crate::patterns::DevicePatterns;

/// Snapshot of one command's progress.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    /// Command line as sent, without the newline.
    pub command: &'a str,
    /// Cleaned output accumulated since the command was sent.
    pub output: &'a str,
    /// Pager markers before this byte offset were already handled.
    pub scan_from: usize,
    pub since_sent: Duration,
    /// Time since the last byte arrived, or since sending if none has.
    pub since_last_byte: Duration,
}

/// Which signal ended a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSignal {
    Prompt,
    QuietWindow,
}

/// Verdict for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Running,
    /// Output paused behind a pager marker.
    PagerWaiting,
    Complete(CompletionSignal),
    TimedOut,
}

/// Completion detector for one session.
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    patterns: Arc<DevicePatterns>,
    quiet_window: Duration,
    command_timeout: Duration,
}

impl CompletionDetector {
    #[must_use]
    pub fn new(patterns: Arc<DevicePatterns>, config: &EngineConfig) -> Self {
        Self {
            patterns,
            quiet_window: config.quiet_window,
            command_timeout: config.command_timeout,
        }
    }

    /// Evaluate one observation.
    #[must_use]
    pub fn feed(&self, obs: &Observation<'_>) -> Detection {
        let fresh = obs.output.get(obs.scan_from..).unwrap_or_default();
        if self.patterns.has_pager(fresh) {
            return Detection::PagerWaiting;
        }
        if self.parked_at_pager(obs.output) {
            // Marker already answered; the next page has not arrived yet.
            return if obs.since_sent >= self.command_timeout {
                Detection::TimedOut
            } else {
                Detection::Running
            };
        }
        if self.ends_at_prompt(obs.output) {
            return Detection::Complete(CompletionSignal::Prompt);
        }
        if obs.since_last_byte >= self.quiet_window && has_payload(obs.output, obs.command) {
            return Detection::Complete(CompletionSignal::QuietWindow);
        }
        if obs.since_sent >= self.command_timeout {
            return Detection::TimedOut;
        }
        Detection::Running
    }

    /// Whether the final line is nothing but a pager marker and its padding.
    fn parked_at_pager(&self, output: &str) -> bool {
        let last = output.rsplit('\n').next().unwrap_or_default();
        self.patterns.has_pager(last) && self.patterns.strip_pagers(last).trim().is_empty()
    }

    /// The prompt only counts on the final, unterminated line, and only once
    /// the echo line has ended. Pager markers left on that line are ignored.
    fn ends_at_prompt(&self, output: &str) -> bool {
        let Some(newline) = output.rfind('\n') else {
            return false;
        };
        let last = self.patterns.strip_pagers(&output[newline + 1..]);
        self.patterns.is_prompt(last.trim())
    }
}

/// Whether `output` holds anything beyond the echo of `command`. A lone
/// unterminated line is never enough: it may be the echo still arriving or a
/// stale prompt.
#[must_use]
pub fn has_payload(output: &str, command: &str) -> bool {
    let command = command.trim();
    let Some((first, rest)) = output.split_once('\n') else {
        return false;
    };
    if !command.is_empty() && first.trim_end().ends_with(command) {
        !rest.trim().is_empty()
    } else {
        !output.trim().is_empty()
    }
}
