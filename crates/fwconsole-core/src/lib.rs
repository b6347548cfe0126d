//! Core types for driving firewall CLIs over interactive shells.
//!
//! This crate provides the shared vocabulary:
//! - `RemoteTarget` / `DeviceProfile` - who to connect to and how its CLI behaves
//! - `EngineConfig` - timing and buffering tunables
//! - `CommandResult` - what a command produced
//! - `AlertDefinition` / `AlertRunState` - polling inputs and state
//! - Collaborator traits for inventory, session records and alert storage
//! - In-memory implementations of those traits (feature: memory)

pub mod alert;
pub mod command;
pub mod config;
pub mod error;
pub mod storage;
pub mod target;
pub mod traits;

pub use alert::{AlertDefinition, AlertId, AlertRunState, SilenceWindow};
pub use command::{CommandId, CommandResult, CommandStatus};
pub use config::{EngineConfig, PagerPolicy};
pub use error::ConnectError;
pub use target::{Credentials, DeviceKind, DeviceProfile, RemoteTarget, TargetId};
pub use traits::{
    AlertStore, RecordId, SessionRecord, SessionRecordStore, StoreError, TargetResolver,
};
