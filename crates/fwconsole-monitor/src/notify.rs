//! Notification sinks.

use std::sync::Arc;

use async_trait::async_trait;
use fwconsole_core::AlertDefinition;
use thiserror::Error;

use crate::interfaces::DownInterface;

/// Notification delivery error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivers down-interface notifications. Concrete channels (mail, chat,
/// webhooks) live outside this crate.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell the definition's recipients which interfaces are down.
    ///
    /// # Errors
    /// Returns error if delivery failed. The scheduler retries on a later cycle.
    async fn notify(
        &self,
        definition: &AlertDefinition,
        down: &[DownInterface],
    ) -> Result<(), NotifyError>;
}

/// Writes each notification as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        definition: &AlertDefinition,
        down: &[DownInterface],
    ) -> Result<(), NotifyError> {
        let keys: Vec<String> = down.iter().map(DownInterface::key).collect();
        tracing::warn!(
            alert_id = %definition.id,
            alert = %definition.name,
            recipients = ?definition.recipients,
            count = down.len(),
            down = %keys.join(", "),
            "Interfaces down"
        );
        Ok(())
    }
}

/// Delivers to every sink, even when an earlier one fails.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(
        &self,
        definition: &AlertDefinition,
        down: &[DownInterface],
    ) -> Result<(), NotifyError> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.notify(definition, down).await {
                tracing::warn!(alert_id = %definition.id, error = %e, "Notification sink failed");
                failures.push(e.to_string());
            }
        }
        if failures.len() == self.sinks.len() && !failures.is_empty() {
            return Err(NotifyError::Delivery(failures.join("; ")));
        }
        Ok(())
    }
}
