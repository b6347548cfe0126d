//! Paces cleaned output towards consumers.
//!
//! Streaming mode releases on a flush interval or as soon as a full chunk is
//! buffered; batched mode holds everything until the command is done.

use std::{sync::Arc, time::Duration};

use fwconsole_core::EngineConfig;
use tokio::time::Instant;

use crate::{ansi, patterns::DevicePatterns};

/// Smallest accepted chunk size, so every release fits at least one `char`.
const MIN_CHUNK: usize = 4;

/// Decoded text as read from the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub text: String,
    pub at: Instant,
}

impl OutputChunk {
    #[must_use]
    pub fn new(text: impl Into<String>, at: Instant) -> Self {
        Self {
            text: text.into(),
            at,
        }
    }
}

/// How output is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleMode {
    Streaming,
    Batched,
}

/// Output buffer with time and size bounds.
#[derive(Debug)]
pub struct OutputThrottler {
    mode: ThrottleMode,
    flush_interval: Duration,
    max_chunk_size: usize,
    patterns: Arc<DevicePatterns>,
    buffer: String,
    last_release: Instant,
}

impl OutputThrottler {
    #[must_use]
    pub fn new(
        mode: ThrottleMode,
        config: &EngineConfig,
        patterns: Arc<DevicePatterns>,
        now: Instant,
    ) -> Self {
        Self {
            mode,
            flush_interval: config.flush_interval,
            max_chunk_size: config.max_chunk_size.max(MIN_CHUNK),
            patterns,
            buffer: String::new(),
            last_release: now,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clean and buffer a chunk. Pager markers are removed on release, so a
    /// marker and the padding that erases it are seen together.
    pub fn append(&mut self, chunk: &OutputChunk) {
        self.buffer.push_str(&ansi::clean(&chunk.text));
    }

    /// Next piece due for release in streaming mode.
    pub fn take_ready(&mut self, now: Instant) -> Option<String> {
        if self.mode == ThrottleMode::Batched || self.buffer.is_empty() {
            return None;
        }
        let full = self.buffer.len() >= self.max_chunk_size;
        let due = now.saturating_duration_since(self.last_release) >= self.flush_interval;
        if !full && !due {
            return None;
        }
        self.last_release = now;
        self.release()
    }

    /// Everything still buffered. Streaming output comes back in pieces of at
    /// most the chunk size; batched output as a single piece.
    pub fn drain(&mut self) -> Vec<String> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        if self.mode == ThrottleMode::Batched {
            let text = std::mem::take(&mut self.buffer);
            return vec![self.patterns.strip_pagers(&text).into_owned()];
        }
        let mut pieces = Vec::new();
        while let Some(piece) = self.release() {
            pieces.push(piece);
        }
        pieces
    }

    /// Next non-empty piece with pager markers removed.
    fn release(&mut self) -> Option<String> {
        while !self.buffer.is_empty() {
            let raw = self.split_front();
            let piece = self.patterns.strip_pagers(&raw);
            if !piece.is_empty() {
                return Some(piece.into_owned());
            }
        }
        None
    }

    fn split_front(&mut self) -> String {
        if self.buffer.len() <= self.max_chunk_size {
            return std::mem::take(&mut self.buffer);
        }
        let mut cut = self.max_chunk_size;
        while !self.buffer.is_char_boundary(cut) {
            cut -= 1;
        }
        let rest = self.buffer.split_off(cut);
        std::mem::replace(&mut self.buffer, rest)
    }
}
