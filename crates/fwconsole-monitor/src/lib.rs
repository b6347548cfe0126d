//! Interface-health polling and alerting for firewalls.
//!
//! Provides:
//! - `Scheduler` - periodic polling over batched engines
//! - `parser` - per-vendor interface table parsers
//! - `policy` - pure notify/suppress decisions
//! - `Notifier` implementations (log, fan-out)
//! - `PollTracker` - per-definition poll status

pub mod interfaces;
pub mod notify;
pub mod parser;
pub mod policy;
pub mod scheduler;
pub mod tracker;

pub use interfaces::{DownInterface, InterfaceRecord, LinkStatus};
pub use notify::{FanoutNotifier, LogNotifier, NotifyError, Notifier};
pub use parser::ParseError;
pub use policy::{Decision, SuppressReason};
pub use scheduler::{CycleSummary, Scheduler, SchedulerConfig, SchedulerError, SchedulerHandle};
pub use tracker::{PollStatus, PollTracker};
