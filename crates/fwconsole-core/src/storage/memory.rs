//! In-memory stores.
//!
//! Useful for development and single-process deployments.
//! Data is lost on restart.

use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::{
    AlertDefinition, AlertId, AlertRunState, RemoteTarget, TargetId,
    traits::{AlertStore, RecordId, SessionRecord, SessionRecordStore, StoreError, TargetResolver},
};
use uuid::Uuid;

/// Alert definitions with their run state.
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    entries: RwLock<BTreeMap<AlertId, (AlertDefinition, AlertRunState)>>,
}

impl MemoryAlertStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition. Its run state starts fresh (due now).
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn insert(&self, definition: AlertDefinition) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .insert(definition.id.clone(), (definition, AlertRunState::default()));
        Ok(())
    }

    /// Current run state of a definition.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn run_state(&self, id: &AlertId) -> Result<Option<AlertRunState>, StoreError> {
        Ok(self
            .entries
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(id)
            .map(|(_, state)| state.clone()))
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(AlertDefinition, AlertRunState)>, StoreError> {
        Ok(self
            .entries
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .values()
            .filter(|(def, state)| def.active && state.is_due(now))
            .cloned()
            .collect())
    }

    async fn record_cycle(&self, id: &AlertId, state: AlertRunState) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        entry.1 = state;
        Ok(())
    }
}

/// Static target inventory.
#[derive(Debug, Default)]
pub struct MemoryTargetDirectory {
    targets: RwLock<HashMap<TargetId, RemoteTarget>>,
}

impl MemoryTargetDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from a list of targets.
    #[must_use]
    pub fn from_targets(targets: impl IntoIterator<Item = RemoteTarget>) -> Self {
        Self {
            targets: RwLock::new(targets.into_iter().map(|t| (t.id.clone(), t)).collect()),
        }
    }

    /// Add or replace a target.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn insert(&self, target: RemoteTarget) -> Result<(), StoreError> {
        self.targets
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .insert(target.id.clone(), target);
        Ok(())
    }
}

#[async_trait]
impl TargetResolver for MemoryTargetDirectory {
    async fn resolve(&self, id: &TargetId) -> Result<Option<RemoteTarget>, StoreError> {
        Ok(self
            .targets
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(id)
            .cloned())
    }
}

/// Operator session bookkeeping.
#[derive(Debug, Default)]
pub struct MemorySessionRecords {
    records: RwLock<HashMap<RecordId, SessionRecord>>,
}

impl MemorySessionRecords {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn get(&self, id: RecordId) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(&id)
            .cloned())
    }

    /// Records still marked active, newest first.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn active(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let mut result: Vec<SessionRecord> =
            records.values().filter(|r| r.active).cloned().collect();
        result.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        Ok(result)
    }
}

#[async_trait]
impl SessionRecordStore for MemorySessionRecords {
    async fn open(&self, target_id: &TargetId, operator: &str) -> Result<RecordId, StoreError> {
        let id = Uuid::new_v4();
        let record = SessionRecord {
            id,
            target_id: target_id.clone(),
            operator: operator.to_string(),
            active: true,
            opened_at: Utc::now(),
            closed_at: None,
        };

        self.records
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .insert(id, record);

        Ok(id)
    }

    async fn mark_inactive(&self, id: RecordId) -> Result<(), StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let record = records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if record.active {
            record.active = false;
            record.closed_at = Some(Utc::now());
        }
        Ok(())
    }
}
