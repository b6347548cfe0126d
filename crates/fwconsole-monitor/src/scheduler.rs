//! Periodic interface polling.
//!
//! Each cycle fetches the due alert definitions, polls their targets over
//! batched engines, and hands the resulting down-set to the notification
//! policy. The run state is written once per definition, at the end of its
//! cycle, whatever happened to the individual targets.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use fwconsole_core::{
    AlertDefinition, AlertId, AlertRunState, AlertStore, EngineConfig, StoreError, TargetId,
    TargetResolver,
    config::{millis, seconds},
};
use fwconsole_engine::{CommandEngine, EngineError};
use fwconsole_ssh::Connector;
use futures::{StreamExt, future::join_all, stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};

use crate::{
    interfaces::{DownInterface, InterfaceRecord, down_key},
    notify::Notifier,
    parser,
    policy::{self, Decision},
    tracker::{PollStatus, PollTracker},
};

/// Failed cycles in a row before the scheduler logs at error level.
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Scheduler tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often due definitions are looked up.
    #[serde(with = "seconds", rename = "tick_interval_secs")]
    pub tick_interval: Duration,
    /// Hard bound on connecting to, and polling, a single target.
    #[serde(with = "millis", rename = "per_target_timeout_ms")]
    pub per_target_timeout: Duration,
    /// Definitions processed concurrently.
    pub max_parallel: usize,
    /// Engine timing used for polling sessions.
    pub engine: EngineConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            per_target_timeout: Duration::from_secs(90),
            max_parallel: 8,
            engine: EngineConfig::polling(),
        }
    }
}

/// Scheduler error.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Unknown target: {0}")]
    UnknownTarget(TargetId),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Command `{command}` ended with status {status}: {reason}")]
    Command {
        command: String,
        status: &'static str,
        reason: String,
    },
    #[error("Target poll timed out after {0:?}")]
    Timeout(Duration),
}

impl SchedulerError {
    /// Whether the target refused the configured credentials. Retrying will
    /// not help until the inventory changes.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        match self {
            Self::Engine(EngineError::Connection(e)) => e.is_authentication(),
            _ => false,
        }
    }
}

/// Counts from one [`Scheduler::run_cycle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Definitions that ran to completion.
    pub processed: usize,
    /// Definitions whose previous cycle was still in flight.
    pub skipped: usize,
    /// Definitions whose run state could not be written.
    pub failed: usize,
    /// Notifications delivered.
    pub notified: usize,
    /// Target polls that failed across all definitions.
    pub failed_targets: usize,
}

enum Outcome {
    Skipped,
    Processed { notified: bool, failed_targets: usize },
    Failed { failed_targets: usize },
}

/// Polls alert definitions and raises notifications.
pub struct Scheduler {
    store: Arc<dyn AlertStore>,
    resolver: Arc<dyn TargetResolver>,
    connector: Arc<dyn Connector>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
    tracker: Arc<PollTracker>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn AlertStore>,
        resolver: Arc<dyn TargetResolver>,
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            connector,
            notifier,
            config,
            tracker: Arc::new(PollTracker::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Per-definition poll status.
    #[must_use]
    pub fn tracker(&self) -> Arc<PollTracker> {
        Arc::clone(&self.tracker)
    }

    #[must_use]
    pub fn status(&self, id: &AlertId) -> PollStatus {
        self.tracker.status(id)
    }

    /// Process every definition due at `now`.
    ///
    /// Target and notification failures are absorbed per definition.
    ///
    /// # Errors
    /// Returns error only if the due definitions could not be loaded.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleSummary, SchedulerError> {
        let due = self.store.due(now).await?;
        if due.is_empty() {
            return Ok(CycleSummary::default());
        }
        tracing::debug!(count = due.len(), "Running poll cycle");

        let outcomes: Vec<Outcome> = stream::iter(due)
            .map(|(definition, state)| self.run_definition(definition, state, now))
            .buffer_unordered(self.config.max_parallel.max(1))
            .collect()
            .await;

        let mut summary = CycleSummary::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Processed {
                    notified,
                    failed_targets,
                } => {
                    summary.processed += 1;
                    summary.notified += usize::from(notified);
                    summary.failed_targets += failed_targets;
                }
                Outcome::Failed { failed_targets } => {
                    summary.failed += 1;
                    summary.failed_targets += failed_targets;
                }
            }
        }
        Ok(summary)
    }

    async fn run_definition(
        &self,
        definition: AlertDefinition,
        state: AlertRunState,
        now: DateTime<Utc>,
    ) -> Outcome {
        let id = definition.id.clone();
        if !self.tracker.try_begin(&id, now) {
            tracing::debug!(alert_id = %id, "Previous cycle still running, skipping");
            return Outcome::Skipped;
        }

        let def = &definition;
        let polls = def.targets.iter().map(|target_id| async move {
            (target_id, self.poll_with_timeout(def, target_id).await)
        });

        let mut down = Vec::new();
        let mut failures = Vec::new();
        for (target_id, result) in join_all(polls).await {
            match result {
                Ok(records) => down.extend(
                    records
                        .into_iter()
                        .filter(|r| r.is_down() && definition.watches(&r.name))
                        .map(|r| DownInterface {
                            target_id: target_id.clone(),
                            name: r.name,
                            address: r.address,
                            stale: false,
                        }),
                ),
                Err(e) => {
                    if e.is_authentication() {
                        tracing::error!(alert_id = %id, target_id = %target_id, error = %e, "Target rejected credentials");
                    } else {
                        tracing::warn!(alert_id = %id, target_id = %target_id, error = %e, "Target poll failed");
                    }
                    down.extend(carry_over(&state.last_down_set, target_id));
                    failures.push(format!("{target_id}: {e}"));
                }
            }
        }
        down.sort_by_key(DownInterface::key);
        let keys: BTreeSet<String> = down.iter().map(DownInterface::key).collect();

        let notified = match policy::evaluate(&definition, &state, &keys, now) {
            Decision::Notify => match self.notifier.notify(&definition, &down).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(alert_id = %id, error = %e, "Notification failed, retrying next cycle");
                    false
                }
            },
            Decision::Suppress(reason) => {
                tracing::debug!(alert_id = %id, ?reason, down = keys.len(), "Notification suppressed");
                false
            }
        };

        let down_count = keys.len();
        let next = policy::next_state(&definition, &state, keys, notified, now);
        let failed_targets = failures.len();
        if let Err(e) = self.store.record_cycle(&id, next).await {
            tracing::error!(alert_id = %id, error = %e, "Failed to record cycle");
            self.tracker.finish(
                &id,
                PollStatus::Failed {
                    at: Utc::now(),
                    reason: e.to_string(),
                },
            );
            return Outcome::Failed { failed_targets };
        }

        let status = if !definition.targets.is_empty() && failed_targets == definition.targets.len() {
            PollStatus::Failed {
                at: Utc::now(),
                reason: failures.join("; "),
            }
        } else {
            PollStatus::Succeeded {
                at: Utc::now(),
                down: down_count,
                notified,
            }
        };
        self.tracker.finish(&id, status);
        Outcome::Processed {
            notified,
            failed_targets,
        }
    }

    async fn poll_with_timeout(
        &self,
        definition: &AlertDefinition,
        target_id: &TargetId,
    ) -> Result<Vec<InterfaceRecord>, SchedulerError> {
        let timeout = self.config.per_target_timeout;
        tokio::time::timeout(timeout, self.poll_target(definition, target_id))
            .await
            .map_err(|_| SchedulerError::Timeout(timeout))?
    }

    async fn poll_target(
        &self,
        definition: &AlertDefinition,
        target_id: &TargetId,
    ) -> Result<Vec<InterfaceRecord>, SchedulerError> {
        let target = self
            .resolver
            .resolve(target_id)
            .await?
            .ok_or_else(|| SchedulerError::UnknownTarget(target_id.clone()))?;

        let (engine, _events) =
            CommandEngine::open(self.connector.as_ref(), &target, self.config.engine.clone())
                .await?;
        let output = run_commands(&engine, definition).await;
        engine.close().await;
        let output = output?;

        match parser::parse(definition.device_kind, &output) {
            Ok(records) => Ok(records),
            Err(e) => {
                tracing::warn!(
                    alert_id = %definition.id,
                    target_id = %target_id,
                    error = %e,
                    "Unparseable interface output, treating as no interfaces"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Run cycles every tick until stopped.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let interval = self.config.tick_interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut consecutive_errors: u32 = 0;
            tracing::info!(tick = ?interval, "Scheduler started");

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => {}
                }
                let result = tokio::select! {
                    _ = stop_rx.recv() => {
                        let abandoned = self.tracker.abandon_running(Utc::now(), "scheduler stopped mid-cycle");
                        tracing::info!(abandoned, "Poll cycle abandoned");
                        break;
                    }
                    result = self.run_cycle(Utc::now()) => result,
                };
                match result {
                    Ok(summary) => {
                        consecutive_errors = 0;
                        if summary != CycleSummary::default() {
                            tracing::info!(
                                processed = summary.processed,
                                skipped = summary.skipped,
                                failed = summary.failed,
                                notified = summary.notified,
                                failed_targets = summary.failed_targets,
                                "Poll cycle finished"
                            );
                        }
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            tracing::error!(errors = consecutive_errors, error = %e, "Poll cycles keep failing");
                        } else {
                            tracing::warn!(error = %e, "Poll cycle failed");
                        }
                    }
                }
            }
            tracing::info!("Scheduler stopped");
        });

        SchedulerHandle { stop_tx, task }
    }
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the scheduler and wait for its task. A cycle in progress is
    /// abandoned.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }
}

/// Output of the definition's commands, joined by newlines.
async fn run_commands(
    engine: &CommandEngine,
    definition: &AlertDefinition,
) -> Result<String, SchedulerError> {
    let commands: Vec<&str> = if definition.commands.is_empty() {
        vec![parser::default_command(definition.device_kind)]
    } else {
        definition.commands.iter().map(String::as_str).collect()
    };

    let mut combined = String::new();
    for command in commands {
        let result = engine.execute(command).await?;
        if !result.is_completed() {
            return Err(SchedulerError::Command {
                command: command.to_string(),
                status: result.status.as_str(),
                reason: result.error.unwrap_or_default(),
            });
        }
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(&result.output);
    }
    Ok(combined)
}

/// Keep the last known faults of a target that could not be polled.
fn carry_over(last_down_set: &BTreeSet<String>, target_id: &TargetId) -> Vec<DownInterface> {
    let prefix = down_key(target_id, "");
    last_down_set
        .iter()
        .filter_map(|key| key.strip_prefix(&prefix))
        .map(|name| DownInterface {
            target_id: target_id.clone(),
            name: name.to_string(),
            address: None,
            stale: true,
        })
        .collect()
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use fwconsole_core::{
        ConnectError, Credentials, DeviceKind, DeviceProfile, RemoteTarget,
        storage::{MemoryAlertStore, MemoryTargetDirectory},
    };
    use fwconsole_ssh::{ConnectBehavior, ScriptedConnector, ScriptedDevice, Step};

    use super::*;
    use crate::notify::testing::RecordingNotifier;

    const COMMAND: &str = "get system interface physical";

    fn device(port2: &str) -> ScriptedDevice {
        ScriptedDevice::new("FGT-01 # ").respond(
            COMMAND,
            [
                Step::line("== [onboard]"),
                Step::line("        ==[port1]"),
                Step::line("                status: up"),
                Step::line("        ==[port2]"),
                Step::line(format!("                status: {port2}")),
            ],
        )
    }

    fn target(id: &str) -> RemoteTarget {
        RemoteTarget {
            id: TargetId::new(id),
            name: id.to_uppercase(),
            host: "192.0.2.1".into(),
            port: 22,
            credentials: Credentials::new("monitor", "secret"),
            profile: DeviceProfile::for_kind(DeviceKind::FortiGate),
        }
    }

    fn definition(id: &str, targets: &[&str]) -> AlertDefinition {
        AlertDefinition {
            id: AlertId(id.into()),
            name: id.into(),
            targets: targets.iter().map(|t| TargetId::new(*t)).collect(),
            commands: vec![COMMAND.into()],
            device_kind: DeviceKind::FortiGate,
            interfaces: Vec::new(),
            check_interval: Duration::from_secs(60),
            cooldown: Duration::ZERO,
            silence: None,
            recipients: vec!["noc@example.net".into()],
            active: true,
        }
    }

    struct Fixture {
        store: Arc<MemoryAlertStore>,
        directory: Arc<MemoryTargetDirectory>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Fixture {
        fn new(definitions: Vec<AlertDefinition>, targets: &[&str]) -> Self {
            let store = Arc::new(MemoryAlertStore::new());
            for def in definitions {
                store.insert(def).unwrap();
            }
            Self {
                store,
                directory: Arc::new(MemoryTargetDirectory::from_targets(
                    targets.iter().map(|t| target(t)),
                )),
                notifier: Arc::new(RecordingNotifier::default()),
            }
        }

        fn scheduler(&self, connector: ScriptedConnector) -> Scheduler {
            Scheduler::new(
                Arc::clone(&self.store) as Arc<dyn AlertStore>,
                Arc::clone(&self.directory) as Arc<dyn TargetResolver>,
                Arc::new(connector),
                Arc::clone(&self.notifier) as Arc<dyn Notifier>,
                SchedulerConfig::default(),
            )
        }

        fn sent(&self) -> Vec<Vec<String>> {
            self.notifier.sent.lock().unwrap().clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_down_set_notifies_once() {
        let fixture = Fixture::new(vec![definition("wan", &["fw-01"])], &["fw-01"]);
        let scheduler = fixture.scheduler(ScriptedConnector::new(device("down")));
        let t0 = Utc::now();

        let first = scheduler.run_cycle(t0).await.unwrap();
        assert_eq!(first.processed, 1);
        assert_eq!(first.notified, 1);

        let second = scheduler.run_cycle(t0 + chrono::TimeDelta::seconds(60)).await.unwrap();
        assert_eq!(second.processed, 1);
        assert_eq!(second.notified, 0);

        assert_eq!(fixture.sent(), vec![vec!["fw-01/port2".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_due_until_check_interval() {
        let fixture = Fixture::new(vec![definition("wan", &["fw-01"])], &["fw-01"]);
        let scheduler = fixture.scheduler(ScriptedConnector::new(device("up")));
        let t0 = Utc::now();

        scheduler.run_cycle(t0).await.unwrap();
        let summary = scheduler.run_cycle(t0 + chrono::TimeDelta::seconds(30)).await.unwrap();
        assert_eq!(summary, CycleSummary::default());

        let state = fixture.store.run_state(&AlertId("wan".into())).unwrap().unwrap();
        assert_eq!(state.next_check_at, Some(t0 + chrono::TimeDelta::seconds(60)));
        assert!(fixture.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_target_does_not_affect_others() {
        let fixture = Fixture::new(
            vec![
                definition("edge", &["fw-01", "fw-02"]),
                definition("lab", &["fw-99"]),
            ],
            &["fw-01", "fw-02"],
        );
        let refused = ConnectError::Authentication {
            username: "monitor".into(),
            address: "192.0.2.1:22".into(),
        };
        let connector = ScriptedConnector::new(device("down"))
            .target(TargetId::new("fw-02"), ConnectBehavior::Refuse(refused));
        let scheduler = fixture.scheduler(connector);
        let t0 = Utc::now();

        let summary = scheduler.run_cycle(t0).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed_targets, 2);
        assert_eq!(fixture.sent(), vec![vec!["fw-01/port2".to_string()]]);

        let lab = fixture.store.run_state(&AlertId("lab".into())).unwrap().unwrap();
        assert_eq!(lab.next_check_at, Some(t0 + chrono::TimeDelta::seconds(60)));
        assert!(matches!(
            scheduler.status(&AlertId("lab".into())),
            PollStatus::Failed { .. }
        ));
        assert!(matches!(
            scheduler.status(&AlertId("edge".into())),
            PollStatus::Succeeded { down: 1, notified: true, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_target_keeps_last_faults() {
        let fixture = Fixture::new(vec![definition("wan", &["fw-01"])], &["fw-01"]);
        let t0 = Utc::now();

        fixture
            .scheduler(ScriptedConnector::new(device("down")))
            .run_cycle(t0)
            .await
            .unwrap();

        let unreachable = fixture.scheduler(ScriptedConnector::with_fallback(ConnectBehavior::Hang));
        let summary = unreachable
            .run_cycle(t0 + chrono::TimeDelta::seconds(60))
            .await
            .unwrap();
        assert_eq!(summary.failed_targets, 1);
        assert_eq!(summary.notified, 0);

        let state = fixture.store.run_state(&AlertId("wan".into())).unwrap().unwrap();
        assert!(state.last_down_set.contains("fw-01/port2"));
        assert_eq!(fixture.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_output_counts_as_no_interfaces() {
        let mut def = definition("wan", &["fw-01"]);
        def.commands = vec!["diagnose hardware deviceinfo nic".into()];
        let fixture = Fixture::new(vec![def], &["fw-01"]);
        let scheduler = fixture.scheduler(ScriptedConnector::new(device("down")));

        let summary = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed_targets, 0);
        assert!(matches!(
            scheduler.status(&AlertId("wan".into())),
            PollStatus::Succeeded { down: 0, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_definition_is_skipped() {
        let fixture = Fixture::new(vec![definition("wan", &["fw-01"])], &["fw-01"]);
        let connector = ScriptedConnector::new(device("down"));
        let scheduler = fixture.scheduler(connector);
        let now = Utc::now();

        assert!(scheduler.tracker().try_begin(&AlertId("wan".into()), now));
        let summary = scheduler.run_cycle(now).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 0);
        assert!(fixture.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_cycle_releases_definitions() {
        let fixture = Fixture::new(vec![definition("wan", &["fw-01"])], &["fw-01"]);
        let slow = ScriptedDevice::new("FGT-01 # ")
            .respond(COMMAND, [Step::Delay(Duration::from_secs(45)), Step::line("== [onboard]")]);
        let scheduler = Arc::new(fixture.scheduler(ScriptedConnector::new(slow)));
        let wan = AlertId("wan".into());

        let handle = Arc::clone(&scheduler).spawn();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(scheduler.tracker().running(), vec![wan.clone()]);
        handle.stop().await;

        assert!(scheduler.tracker().running().is_empty());
        assert!(matches!(scheduler.status(&wan), PollStatus::Failed { .. }));

        // Nothing was recorded, so the definition is still due and runs again.
        let summary = scheduler.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.processed, 1);
    }

    #[test]
    fn test_authentication_failures_are_recognised() {
        let refused = SchedulerError::Engine(EngineError::Connection(ConnectError::Authentication {
            username: "monitor".into(),
            address: "192.0.2.1:22".into(),
        }));
        assert!(refused.is_authentication());
        assert!(!SchedulerError::Timeout(Duration::from_secs(90)).is_authentication());
        assert!(!SchedulerError::UnknownTarget(TargetId::new("fw-99")).is_authentication());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_scheduler_runs_until_stopped() {
        let fixture = Fixture::new(vec![definition("wan", &["fw-01"])], &["fw-01"]);
        let scheduler = Arc::new(fixture.scheduler(ScriptedConnector::new(device("down"))));

        let handle = Arc::clone(&scheduler).spawn();
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.stop().await;

        assert_eq!(fixture.sent().len(), 1);
        assert!(scheduler.tracker().running().is_empty());
    }
}
