//! Command execution engine for firewall CLIs.
//!
//! Provides:
//! - `CommandEngine` - one command at a time over a shell, busy-rejecting
//! - `CompletionDetector` - prompt, quiet-window, pager and timeout detection
//! - `OutputThrottler` - streaming and batched output pacing
//! - ANSI and UTF-8 cleanup of raw shell bytes

pub mod ansi;
pub mod detector;
pub mod engine;
pub mod output;
pub mod patterns;
pub mod throttle;

pub use detector::{CompletionDetector, CompletionSignal, Detection, Observation};
pub use engine::{
    CommandEngine, CommandEvent, CommandPhase, CommandStream, EngineError, EngineEvent,
    EngineEvents, SessionState,
};
pub use patterns::DevicePatterns;
pub use throttle::{OutputChunk, OutputThrottler, ThrottleMode};
