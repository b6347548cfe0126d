//! Boundaries to the surrounding system: inventory, session records, alert store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{AlertDefinition, AlertId, AlertRunState, RemoteTarget, TargetId};

/// Session record identifier.
pub type RecordId = Uuid;

/// Bookkeeping row for one operator terminal session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: RecordId,
    pub target_id: TargetId,
    pub operator: String,
    pub active: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Resolves target identifiers to connectable targets with decrypted credentials.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Look up a target. `Ok(None)` means it does not exist.
    async fn resolve(&self, id: &TargetId) -> Result<Option<RemoteTarget>, StoreError>;
}

/// Tracks which operator sessions are open.
#[async_trait]
pub trait SessionRecordStore: Send + Sync {
    /// Record a newly connected session.
    async fn open(&self, target_id: &TargetId, operator: &str) -> Result<RecordId, StoreError>;

    /// Mark a session inactive. Marking an inactive record again is a no-op.
    async fn mark_inactive(&self, id: RecordId) -> Result<(), StoreError>;
}

/// Alert definitions plus the run state the scheduler writes back.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Active definitions whose next check is at or before `now`.
    async fn due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(AlertDefinition, AlertRunState)>, StoreError>;

    /// Persist the run state at the end of a cycle.
    async fn record_cycle(&self, id: &AlertId, state: AlertRunState) -> Result<(), StoreError>;
}
