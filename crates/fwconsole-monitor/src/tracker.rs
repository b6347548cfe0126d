//! Per-scheduler poll status, queryable by alert id.
//!
//! Doubles as the in-flight guard: a definition cannot start a cycle while
//! its previous one is still running.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use fwconsole_core::AlertId;
use serde::Serialize;

/// Finished entries kept before the oldest are evicted.
const DEFAULT_CAPACITY: usize = 1024;

/// Status of the latest cycle of one definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PollStatus {
    Idle,
    Running { since: DateTime<Utc> },
    Succeeded { at: DateTime<Utc>, down: usize, notified: bool },
    Failed { at: DateTime<Utc>, reason: String },
}

impl PollStatus {
    const fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Succeeded { at, .. } | Self::Failed { at, .. } => Some(*at),
            Self::Idle | Self::Running { .. } => None,
        }
    }
}

/// Bounded map of alert id to [`PollStatus`].
#[derive(Debug)]
pub struct PollTracker {
    entries: Mutex<HashMap<AlertId, PollStatus>>,
    capacity: usize,
}

impl Default for PollTracker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl PollTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<AlertId, PollStatus>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest status; [`PollStatus::Idle`] for unknown ids.
    #[must_use]
    pub fn status(&self, id: &AlertId) -> PollStatus {
        self.entries().get(id).cloned().unwrap_or(PollStatus::Idle)
    }

    /// Mark `id` running. Returns `false` if a cycle is already in flight.
    pub fn try_begin(&self, id: &AlertId, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries();
        if matches!(entries.get(id), Some(PollStatus::Running { .. })) {
            return false;
        }
        entries.insert(id.clone(), PollStatus::Running { since: now });
        Self::evict(&mut entries, self.capacity);
        true
    }

    /// Record the outcome of the cycle started by [`try_begin`](Self::try_begin).
    pub fn finish(&self, id: &AlertId, status: PollStatus) {
        self.entries().insert(id.clone(), status);
    }

    /// Mark every in-flight cycle failed, for cycles that will never finish.
    /// Returns how many were affected.
    pub fn abandon_running(&self, at: DateTime<Utc>, reason: &str) -> usize {
        let mut entries = self.entries();
        let mut abandoned = 0;
        for status in entries.values_mut() {
            if matches!(status, PollStatus::Running { .. }) {
                *status = PollStatus::Failed {
                    at,
                    reason: reason.to_string(),
                };
                abandoned += 1;
            }
        }
        abandoned
    }

    /// Ids with a cycle in flight.
    #[must_use]
    pub fn running(&self) -> Vec<AlertId> {
        self.entries()
            .iter()
            .filter(|(_, s)| matches!(s, PollStatus::Running { .. }))
            .map(|(id, _)| id.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the oldest finished entries beyond `capacity`. Running entries
    /// are never evicted.
    fn evict(entries: &mut HashMap<AlertId, PollStatus>, capacity: usize) {
        while entries.len() > capacity {
            let oldest = entries
                .iter()
                .filter_map(|(id, s)| s.finished_at().map(|at| (at, id.clone())))
                .min();
            match oldest {
                Some((_, id)) => {
                    entries.remove(&id);
                }
                None => break,
            }
        }
    }
}
