//! One operator's terminal on one target.
//!
//! Transport-agnostic: client messages go in through [`TerminalSession::handle`],
//! server messages come out of the channel given at construction.

use std::sync::Arc;

use fwconsole_core::{
    CommandStatus, EngineConfig, RecordId, RemoteTarget, SessionRecordStore,
};
use fwconsole_engine::{CommandEngine, CommandEvent, CommandStream, EngineEvent, EngineEvents, SessionState};
use fwconsole_ssh::Connector;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    error::GatewayError,
    protocol::{ClientMessage, CommandStatusContent, PagerAction, ServerMessage},
};

struct Live {
    engine: CommandEngine,
    record_id: Option<RecordId>,
    forwarder: JoinHandle<()>,
}

/// Bridges client messages to a lazily opened [`CommandEngine`].
pub struct TerminalSession {
    target: RemoteTarget,
    operator: String,
    connector: Arc<dyn Connector>,
    records: Arc<dyn SessionRecordStore>,
    config: EngineConfig,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    state: Arc<watch::Sender<SessionState>>,
    live: Option<Live>,
}

impl TerminalSession {
    #[must_use]
    pub fn new(
        target: RemoteTarget,
        operator: impl Into<String>,
        connector: Arc<dyn Connector>,
        records: Arc<dyn SessionRecordStore>,
        config: EngineConfig,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            target,
            operator: operator.into(),
            connector,
            records,
            config,
            outbound,
            state: Arc::new(watch::Sender::new(SessionState::Disconnected)),
            live: None,
        }
    }

    #[must_use]
    pub const fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Connection state, including the `Connecting` window of a lazy connect.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow state changes, e.g. while `handle` is awaiting a connect.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Whether a shell is open and usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.engine.state() == SessionState::Connected)
    }

    /// Process one client message. Failures are reported to the client as
    /// `error` messages.
    pub async fn handle(&mut self, message: ClientMessage) {
        let result = match message {
            ClientMessage::Connect => self.connect().await,
            ClientMessage::Command { command } => self.command(&command).await,
            ClientMessage::PagerAction { action } => self.pager(action).await,
            ClientMessage::Disconnect => self.disconnect().await,
        };
        if let Err(e) = result {
            tracing::debug!(target_id = %self.target.id, operator = %self.operator, error = %e, "Client request failed");
            self.send(ServerMessage::Error(e.to_string()));
        }
    }

    /// Close the shell and mark the session record inactive. Safe to call
    /// when nothing is open.
    pub async fn shutdown(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        self.state.send_replace(SessionState::Disconnected);
        live.engine.close().await;
        live.forwarder.abort();
        if let Some(id) = live.record_id {
            mark_inactive(self.records.as_ref(), id).await;
        }
        tracing::info!(target_id = %self.target.id, operator = %self.operator, "Terminal session closed");
    }

    async fn connect(&mut self) -> Result<(), GatewayError> {
        if self.is_connected() {
            return Err(GatewayError::AlreadyConnected);
        }
        // A session lost earlier is replaced.
        self.shutdown().await;

        self.send(ServerMessage::System(format!(
            "Connecting to {} ({})...",
            self.target.name,
            self.target.address()
        )));
        self.state.send_replace(SessionState::Connecting);
        let opened =
            CommandEngine::open(self.connector.as_ref(), &self.target, self.config.clone()).await;
        let (engine, events) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.state.send_replace(SessionState::Disconnected);
                return Err(e.into());
            }
        };

        let record_id = match self.records.open(&self.target.id, &self.operator).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(target_id = %self.target.id, error = %e, "Failed to record session");
                None
            }
        };
        let forwarder = tokio::spawn(forward_events(
            events,
            self.outbound.clone(),
            Arc::clone(&self.records),
            record_id,
            Arc::clone(&self.state),
        ));
        tracing::info!(
            target_id = %self.target.id,
            operator = %self.operator,
            started_at = %engine.created_at(),
            "Terminal session opened"
        );
        self.live = Some(Live {
            engine,
            record_id,
            forwarder,
        });
        self.state.send_replace(SessionState::Connected);

        self.send(ServerMessage::System(format!("Connected to {}", self.target.name)));
        Ok(())
    }

    async fn command(&self, command: &str) -> Result<(), GatewayError> {
        let engine = self.engine()?;
        let stream = engine.execute_streaming(command).await?;
        tracing::debug!(target_id = %self.target.id, command_id = %stream.id(), command, "Command submitted");
        tokio::spawn(forward_command(stream, self.outbound.clone()));
        Ok(())
    }

    async fn pager(&self, action: PagerAction) -> Result<(), GatewayError> {
        let engine = self.engine()?;
        match action.fixed_key() {
            Some(key) => engine.send_raw(key).await?,
            None => engine.continue_pager().await?,
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), GatewayError> {
        if self.live.is_none() {
            return Err(GatewayError::NotConnected);
        }
        self.shutdown().await;
        self.send(ServerMessage::System("Disconnected".into()));
        Ok(())
    }

    fn engine(&self) -> Result<&CommandEngine, GatewayError> {
        self.live
            .as_ref()
            .map(|live| &live.engine)
            .filter(|engine| engine.state() == SessionState::Connected)
            .ok_or(GatewayError::NotConnected)
    }

    fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message);
    }
}

/// Relay output that arrives outside any command, until the session ends.
async fn forward_events(
    mut events: EngineEvents,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    records: Arc<dyn SessionRecordStore>,
    record_id: Option<RecordId>,
    state: Arc<watch::Sender<SessionState>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Output(text) => {
                if outbound.send(ServerMessage::Output(text)).is_err() {
                    break;
                }
            }
            EngineEvent::SessionLost(reason) => {
                state.send_replace(SessionState::Disconnected);
                if let Some(id) = record_id {
                    mark_inactive(records.as_ref(), id).await;
                }
                let _ = outbound.send(ServerMessage::System(format!("Connection lost: {reason}")));
                break;
            }
        }
    }
}

/// Relay one command's events, ending with its status.
async fn forward_command(mut stream: CommandStream, outbound: mpsc::UnboundedSender<ServerMessage>) {
    let command_id = stream.id();
    loop {
        let message = match stream.next().await {
            Some(CommandEvent::Output(text)) => ServerMessage::Output(text),
            Some(CommandEvent::Pager(prompt)) => ServerMessage::Pager(prompt),
            Some(CommandEvent::Finished(result)) => {
                let _ = outbound.send(ServerMessage::CommandStatus((&result).into()));
                return;
            }
            None => {
                let _ = outbound.send(ServerMessage::CommandStatus(CommandStatusContent {
                    command_id,
                    status: CommandStatus::Failed,
                    error: Some("session closed".into()),
                }));
                return;
            }
        };
        if outbound.send(message).is_err() {
            return;
        }
    }
}

async fn mark_inactive(records: &dyn SessionRecordStore, id: RecordId) {
    if let Err(e) = records.mark_inactive(id).await {
        tracing::warn!(record_id = %id, error = %e, "Failed to mark session inactive");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fwconsole_core::{
        ConnectError, Credentials, DeviceKind, DeviceProfile, PagerPolicy, TargetId,
    };
    use fwconsole_core::storage::MemorySessionRecords;
    use fwconsole_ssh::{ConnectBehavior, DeviceLog, ScriptedConnector, ScriptedDevice, Step};

    use super::*;

    struct Harness {
        session: TerminalSession,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
        records: Arc<MemorySessionRecords>,
    }

    fn target() -> RemoteTarget {
        RemoteTarget {
            id: TargetId::new("fw-01"),
            name: "Branch firewall".into(),
            host: "192.0.2.10".into(),
            port: 22,
            credentials: Credentials::new("admin", "secret"),
            profile: DeviceProfile::for_kind(DeviceKind::FortiGate),
        }
    }

    fn harness(connector: ScriptedConnector, config: EngineConfig) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let records = Arc::new(MemorySessionRecords::new());
        let session = TerminalSession::new(
            target(),
            "alice",
            Arc::new(connector),
            Arc::clone(&records) as Arc<dyn SessionRecordStore>,
            config,
            tx,
        );
        Harness { session, rx, records }
    }

    fn device() -> ScriptedDevice {
        ScriptedDevice::new("FGT-01 # ")
            .respond("get system status", [Step::line("Version: FortiGate-60F v7.2.5")])
            .respond(
                "execute ping 192.0.2.1",
                [Step::Delay(Duration::from_secs(5)), Step::line("5 packets transmitted")],
            )
            .respond("diagnose sys kill 11 1", [Step::Drop])
            .respond(
                "show full-configuration",
                [
                    Step::line("config system global"),
                    Step::Emit("--More-- ".into()),
                    Step::AwaitKey,
                    Step::line("    set hostname FGT-01"),
                    Step::line("end"),
                ],
            )
    }

    impl Harness {
        /// Messages up to and including the first one matching `done`.
        async fn until(&mut self, done: impl Fn(&ServerMessage) -> bool) -> Vec<ServerMessage> {
            let mut seen = Vec::new();
            loop {
                let message = tokio::time::timeout(Duration::from_secs(120), self.rx.recv())
                    .await
                    .expect("no matching message")
                    .expect("outbound channel closed");
                let matched = done(&message);
                seen.push(message);
                if matched {
                    return seen;
                }
            }
        }

        async fn connect(&mut self) {
            self.session.handle(ClientMessage::Connect).await;
            self.until(|m| matches!(m, ServerMessage::System(s) if s.starts_with("Connected")))
                .await;
        }

        async fn run(&mut self, command: &str) -> (String, CommandStatusContent) {
            self.session
                .handle(ClientMessage::Command {
                    command: command.into(),
                })
                .await;
            let seen = self
                .until(|m| matches!(m, ServerMessage::CommandStatus(_)))
                .await;
            let mut output = String::new();
            let mut status = None;
            for message in seen {
                match message {
                    ServerMessage::Output(text) => output.push_str(&text),
                    ServerMessage::CommandStatus(s) => status = Some(s),
                    _ => {}
                }
            }
            (output, status.unwrap())
        }
    }

    fn is_error(m: &ServerMessage) -> bool {
        matches!(m, ServerMessage::Error(_))
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_lazy_and_recorded() {
        let mut h = harness(ScriptedConnector::new(device()), EngineConfig::interactive());
        assert!(!h.session.is_connected());
        assert!(h.records.active().unwrap().is_empty());

        h.session.handle(ClientMessage::Connect).await;
        let seen = h
            .until(|m| matches!(m, ServerMessage::System(s) if s.starts_with("Connected")))
            .await;

        assert_eq!(
            seen[0],
            ServerMessage::System("Connecting to Branch firewall (192.0.2.10:22)...".into())
        );
        assert!(h.session.is_connected());
        assert_eq!(h.session.state(), SessionState::Connected);
        let active = h.records.active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].operator, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_streams_output_then_status() {
        let mut h = harness(ScriptedConnector::new(device()), EngineConfig::interactive());
        h.connect().await;

        let (output, status) = h.run("get system status").await;

        assert!(output.contains("FortiGate-60F v7.2.5"));
        assert_eq!(status.status, CommandStatus::Completed);
        assert_eq!(status.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_before_connect_is_rejected() {
        let mut h = harness(ScriptedConnector::new(device()), EngineConfig::interactive());
        h.session
            .handle(ClientMessage::Command {
                command: "get system status".into(),
            })
            .await;
        let seen = h.until(is_error).await;
        assert_eq!(seen, vec![ServerMessage::Error("Not connected".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_command_while_busy_is_rejected() {
        let mut h = harness(ScriptedConnector::new(device()), EngineConfig::interactive());
        h.connect().await;

        h.session
            .handle(ClientMessage::Command {
                command: "execute ping 192.0.2.1".into(),
            })
            .await;
        h.session
            .handle(ClientMessage::Command {
                command: "get system status".into(),
            })
            .await;

        let seen = h.until(is_error).await;
        assert_eq!(
            seen.last(),
            Some(&ServerMessage::Error("A command is already running".into()))
        );
        let seen = h.until(|m| matches!(m, ServerMessage::CommandStatus(_))).await;
        assert!(matches!(
            seen.last(),
            Some(ServerMessage::CommandStatus(s)) if s.status == CommandStatus::Completed
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_pager_action() {
        let device = device();
        let log: DeviceLog = device.log();
        let config = EngineConfig {
            pager_policy: PagerPolicy::Manual,
            ..EngineConfig::interactive()
        };
        let mut h = harness(ScriptedConnector::new(device), config);
        h.connect().await;

        h.session
            .handle(ClientMessage::Command {
                command: "show full-configuration".into(),
            })
            .await;
        h.until(|m| matches!(m, ServerMessage::Pager(_))).await;

        h.session
            .handle(ClientMessage::PagerAction {
                action: PagerAction::Continue,
            })
            .await;
        let seen = h.until(|m| matches!(m, ServerMessage::CommandStatus(_))).await;

        assert!(matches!(
            seen.last(),
            Some(ServerMessage::CommandStatus(s)) if s.status == CommandStatus::Completed
        ));
        assert_eq!(log.pager_keys(), vec![b" ".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_closes_and_marks_inactive() {
        let mut h = harness(ScriptedConnector::new(device()), EngineConfig::interactive());
        h.connect().await;

        h.session.handle(ClientMessage::Disconnect).await;
        h.until(|m| *m == ServerMessage::System("Disconnected".into()))
            .await;

        assert!(!h.session.is_connected());
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert!(h.records.active().unwrap().is_empty());

        h.session.handle(ClientMessage::Disconnect).await;
        let seen = h.until(is_error).await;
        assert_eq!(seen.last(), Some(&ServerMessage::Error("Not connected".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_session_reports_failure_and_marks_inactive() {
        let mut h = harness(ScriptedConnector::new(device()), EngineConfig::interactive());
        h.connect().await;

        h.session
            .handle(ClientMessage::Command {
                command: "diagnose sys kill 11 1".into(),
            })
            .await;

        let mut lost = false;
        let mut failed = false;
        while !(lost && failed) {
            let seen = h
                .until(|m| {
                    matches!(m, ServerMessage::CommandStatus(_))
                        || matches!(m, ServerMessage::System(s) if s.starts_with("Connection lost"))
                })
                .await;
            match seen.last() {
                Some(ServerMessage::CommandStatus(s)) => {
                    assert_eq!(s.status, CommandStatus::Failed);
                    failed = true;
                }
                Some(ServerMessage::System(_)) => lost = true,
                _ => unreachable!(),
            }
        }

        assert!(h.records.active().unwrap().is_empty());
        assert!(!h.session.is_connected());
        assert_eq!(h.session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connecting_state_is_observable() {
        let connector = ScriptedConnector::with_fallback(ConnectBehavior::Hang)
            .connect_timeout(Duration::from_secs(10));
        let mut h = harness(connector, EngineConfig::interactive());
        let mut states = h.session.watch_state();
        assert_eq!(*states.borrow(), SessionState::Disconnected);

        let observed = async {
            states.changed().await.unwrap();
            let during = *states.borrow_and_update();
            states.changed().await.unwrap();
            (during, *states.borrow_and_update())
        };
        let ((), (during, after)) = tokio::join!(h.session.handle(ClientMessage::Connect), observed);

        assert_eq!(during, SessionState::Connecting);
        assert_eq!(after, SessionState::Disconnected);
        assert!(!h.session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_reports_error() {
        let refused = ConnectError::Authentication {
            username: "admin".into(),
            address: "192.0.2.10:22".into(),
        };
        let connector = ScriptedConnector::with_fallback(ConnectBehavior::Refuse(refused));
        let mut h = harness(connector, EngineConfig::interactive());

        h.session.handle(ClientMessage::Connect).await;
        let seen = h.until(is_error).await;

        assert!(matches!(
            seen.last(),
            Some(ServerMessage::Error(e)) if e.contains("Authentication failed")
        ));
        assert!(!h.session.is_connected());
        assert!(h.records.active().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_twice_is_rejected() {
        let mut h = harness(ScriptedConnector::new(device()), EngineConfig::interactive());
        h.connect().await;

        h.session.handle(ClientMessage::Connect).await;
        let seen = h.until(is_error).await;
        assert_eq!(seen.last(), Some(&ServerMessage::Error("Already connected".into())));
        assert_eq!(h.records.active().unwrap().len(), 1);
    }
}
