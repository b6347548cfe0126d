//! Command execution over one interactive shell.
//!
//! Each engine owns a single reader task. The task decodes shell output,
//! feeds the outstanding command (if any) and runs completion detection on
//! every read, so bytes are never consumed by two readers. Output that
//! arrives with no command outstanding is forwarded as background output.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use fwconsole_core::{
    CommandId, CommandResult, CommandStatus, EngineConfig, PagerPolicy, RemoteTarget, TargetId,
};
use fwconsole_ssh::{Connector, ShellTransport, TransportError};
use thiserror::Error;
use tokio::{
    sync::{OwnedMutexGuard, mpsc, oneshot, watch},
    time::Instant,
};
use uuid::Uuid;

use crate::{
    ansi::{self, TextDecoder},
    detector::{CompletionDetector, CompletionSignal, Detection, Observation},
    output,
    patterns::DevicePatterns,
    throttle::{OutputChunk, OutputThrottler, ThrottleMode},
};

/// Largest single read from the transport.
const READ_CHUNK: usize = 32 * 1024;

/// Engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Another command is still running on this session")]
    Busy,
    #[error("Session is closed")]
    SessionClosed,
    #[error("Connection failed: {0}")]
    Connection(#[from] fwconsole_core::ConnectError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Invalid device pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Connection state of a session. It only moves forward:
/// `Disconnected -> Connecting -> Connected -> Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Progress of the outstanding command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    /// Written to the shell, nothing read back yet.
    Sent,
    Reading,
    /// Stopped at a pager marker.
    PagerWait,
}

/// Session-level notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Output that arrived while no command was outstanding.
    Output(String),
    /// The shell failed underneath the engine.
    SessionLost(String),
}

/// Progress of a streaming command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    /// Cleaned output, at most one chunk in size.
    Output(String),
    /// The device is waiting at a pager marker for a keystroke.
    Pager(String),
    Finished(CommandResult),
}

/// Receiver for session-level events.
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// Events of one streaming command, ending with [`CommandEvent::Finished`].
#[derive(Debug)]
pub struct CommandStream {
    id: CommandId,
    events: mpsc::UnboundedReceiver<CommandEvent>,
}

impl CommandStream {
    #[must_use]
    pub const fn id(&self) -> CommandId {
        self.id
    }

    /// Next event, or `None` after the command finished.
    pub async fn next(&mut self) -> Option<CommandEvent> {
        self.events.recv().await
    }

    /// Skip remaining progress and wait for the result.
    pub async fn finish(mut self) -> CommandResult {
        while let Some(event) = self.events.recv().await {
            if let CommandEvent::Finished(result) = event {
                return result;
            }
        }
        CommandResult {
            id: self.id,
            status: CommandStatus::Failed,
            output: String::new(),
            error: Some("session dropped".into()),
        }
    }
}

enum Reply {
    Batched(oneshot::Sender<CommandResult>),
    Streaming(mpsc::UnboundedSender<CommandEvent>),
}

struct PendingCommand {
    id: CommandId,
    command: String,
    phase: CommandPhase,
    sent_at: Instant,
    last_byte_at: Option<Instant>,
    /// Cleaned output since the command was sent.
    output: String,
    scan_from: usize,
    /// Manual pager mode: a marker was reported and no key has been sent.
    awaiting_key: bool,
    throttler: OutputThrottler,
    reply: Reply,
    /// Held until the result is delivered.
    guard: OwnedMutexGuard<()>,
}

impl PendingCommand {
    fn ingest(&mut self, text: &str, now: Instant) {
        if text.is_empty() {
            return;
        }
        self.last_byte_at = Some(now);
        self.awaiting_key = false;
        self.phase = CommandPhase::Reading;
        self.output.push_str(&ansi::clean(text));
        self.throttler.append(&OutputChunk::new(text, now));
    }

    fn observation(&self, now: Instant) -> Observation<'_> {
        Observation {
            command: &self.command,
            output: &self.output,
            scan_from: self.scan_from,
            since_sent: now.saturating_duration_since(self.sent_at),
            since_last_byte: now.saturating_duration_since(self.last_byte_at.unwrap_or(self.sent_at)),
        }
    }

    fn stream(&self, event: CommandEvent) {
        if let Reply::Streaming(tx) = &self.reply {
            let _ = tx.send(event);
        }
    }

    fn flush(&mut self, now: Instant) {
        while let Some(text) = self.throttler.take_ready(now) {
            self.stream(CommandEvent::Output(text));
        }
    }

    fn pager_line(&self) -> String {
        self.output
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

#[derive(Default)]
struct Slot {
    closed: bool,
    command: Option<PendingCommand>,
}

struct Inner {
    target_id: TargetId,
    created_at: DateTime<Utc>,
    transport: Arc<dyn ShellTransport>,
    config: EngineConfig,
    patterns: Arc<DevicePatterns>,
    detector: CompletionDetector,
    lock: Arc<tokio::sync::Mutex<()>>,
    slot: Mutex<Slot>,
    shutdown: watch::Sender<bool>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

/// Serialised command execution on one shell session.
///
/// Cheap to clone; clones share the session. At most one command is
/// outstanding at a time and a second caller gets [`EngineError::Busy`]
/// instead of queueing.
#[derive(Clone)]
pub struct CommandEngine {
    inner: Arc<Inner>,
}

impl CommandEngine {
    /// Connect to `target` and start the session.
    ///
    /// # Errors
    /// Returns error if a device pattern is invalid or the connection fails.
    pub async fn open(
        connector: &dyn Connector,
        target: &RemoteTarget,
        config: EngineConfig,
    ) -> Result<(Self, EngineEvents), EngineError> {
        let patterns = DevicePatterns::compile(&target.profile)?;
        tracing::debug!(
            target_id = %target.id,
            address = %target.address(),
            state = ?SessionState::Connecting,
            "Opening shell session"
        );
        let transport = connector.connect(target).await?;
        tracing::info!(target_id = %target.id, kind = ?patterns.kind(), "Shell session connected");
        Ok(Self::start(target.id.clone(), transport, config, patterns))
    }

    /// Start a session on an already connected transport.
    #[must_use]
    pub fn start(
        target_id: TargetId,
        transport: Arc<dyn ShellTransport>,
        config: EngineConfig,
        patterns: DevicePatterns,
    ) -> (Self, EngineEvents) {
        let patterns = Arc::new(patterns);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let idle = OutputThrottler::new(
            ThrottleMode::Streaming,
            &config,
            Arc::clone(&patterns),
            Instant::now(),
        );
        let inner = Arc::new(Inner {
            target_id,
            created_at: Utc::now(),
            transport,
            detector: CompletionDetector::new(Arc::clone(&patterns), &config),
            config,
            patterns,
            lock: Arc::new(tokio::sync::Mutex::new(())),
            slot: Mutex::new(Slot::default()),
            shutdown: shutdown_tx,
            events: events_tx,
        });
        tokio::spawn(read_loop(Arc::downgrade(&inner), shutdown_rx, idle));
        (Self { inner }, events_rx)
    }

    #[must_use]
    pub fn target_id(&self) -> &TargetId {
        &self.inner.target_id
    }

    /// When the session was started.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.inner.slot().closed {
            SessionState::Disconnected
        } else {
            SessionState::Connected
        }
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.lock.try_lock().is_err()
    }

    /// Phase of the outstanding command, `None` when idle.
    #[must_use]
    pub fn current_phase(&self) -> Option<CommandPhase> {
        self.inner.slot().command.as_ref().map(|c| c.phase)
    }

    /// Outstanding command and its phase.
    #[must_use]
    pub fn current_command(&self) -> Option<(CommandId, CommandPhase)> {
        self.inner
            .slot()
            .command
            .as_ref()
            .map(|c| (c.id, c.phase))
    }

    /// Run `command` and wait for its result, with output held back until
    /// completion.
    ///
    /// A transport failure mid-command yields a [`CommandStatus::Failed`]
    /// result, not an error.
    ///
    /// # Errors
    /// Returns [`EngineError::Busy`] if a command is outstanding, or
    /// [`EngineError::SessionClosed`] if the session is gone.
    pub async fn execute(&self, command: &str) -> Result<CommandResult, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.submit(command, ThrottleMode::Batched, Reply::Batched(tx))
            .await?;
        rx.await.map_err(|_| EngineError::SessionClosed)
    }

    /// Run `command`, streaming throttled output as it arrives.
    ///
    /// # Errors
    /// Same as [`execute`](Self::execute).
    pub async fn execute_streaming(&self, command: &str) -> Result<CommandStream, EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .submit(command, ThrottleMode::Streaming, Reply::Streaming(tx))
            .await?;
        Ok(CommandStream { id, events: rx })
    }

    /// Write bytes straight to the shell, bypassing command tracking. Used
    /// for pager keystrokes and control characters.
    ///
    /// # Errors
    /// Returns error if the session is closed or the write fails.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<(), EngineError> {
        if self.inner.slot().closed {
            return Err(EngineError::SessionClosed);
        }
        if let Err(e) = self.inner.transport.write(bytes).await {
            self.inner.fail(e.to_string()).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Advance a paged listing with the device's continuation key.
    ///
    /// # Errors
    /// Same as [`send_raw`](Self::send_raw).
    pub async fn continue_pager(&self) -> Result<(), EngineError> {
        let key = self.inner.patterns.continuation_key().to_vec();
        self.send_raw(&key).await
    }

    /// Close the session. An outstanding command finishes as failed. Safe to
    /// call more than once.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    async fn submit(
        &self,
        command: &str,
        mode: ThrottleMode,
        reply: Reply,
    ) -> Result<CommandId, EngineError> {
        let inner = &self.inner;
        let guard = Arc::clone(&inner.lock)
            .try_lock_owned()
            .map_err(|_| EngineError::Busy)?;
        let id = Uuid::new_v4();
        let now = Instant::now();
        {
            let mut slot = inner.slot();
            if slot.closed {
                return Err(EngineError::SessionClosed);
            }
            slot.command = Some(PendingCommand {
                id,
                command: command.trim_end_matches(['\r', '\n']).to_string(),
                phase: CommandPhase::Sent,
                sent_at: now,
                last_byte_at: None,
                output: String::new(),
                scan_from: 0,
                awaiting_key: false,
                throttler: OutputThrottler::new(mode, &inner.config, Arc::clone(&inner.patterns), now),
                reply,
                guard,
            });
        }
        tracing::debug!(target_id = %inner.target_id, command_id = %id, command, "Command sent");

        let line = format!("{}\n", command.trim_end_matches(['\r', '\n']));
        if let Err(e) = inner.transport.write(line.as_bytes()).await {
            inner.fail(e.to_string()).await;
        }
        Ok(id)
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Process one read. Returns a keystroke to send when a pager needs it.
    fn tick(&self, text: &str, now: Instant, idle: &mut OutputThrottler) -> Option<Vec<u8>> {
        let mut slot = self.slot();
        if slot.closed {
            return None;
        }
        let Some(cmd) = slot.command.as_mut() else {
            if !text.is_empty() {
                idle.append(&OutputChunk::new(text, now));
            }
            while let Some(out) = idle.take_ready(now) {
                self.emit(EngineEvent::Output(out));
            }
            return None;
        };
        for out in idle.drain() {
            self.emit(EngineEvent::Output(out));
        }

        cmd.ingest(text, now);
        let (status, error, signal) = match self.detector.feed(&cmd.observation(now)) {
            Detection::Running => {
                cmd.flush(now);
                return None;
            }
            Detection::PagerWaiting => {
                cmd.scan_from = cmd.output.len();
                cmd.phase = CommandPhase::PagerWait;
                cmd.flush(now);
                return match self.config.pager_policy {
                    PagerPolicy::Auto => {
                        tracing::trace!(target_id = %self.target_id, command_id = %cmd.id, "Continuing pager");
                        Some(self.patterns.continuation_key().to_vec())
                    }
                    PagerPolicy::Manual => {
                        cmd.awaiting_key = true;
                        cmd.stream(CommandEvent::Pager(cmd.pager_line()));
                        None
                    }
                };
            }
            Detection::Complete(CompletionSignal::QuietWindow) if cmd.awaiting_key => {
                cmd.flush(now);
                return None;
            }
            Detection::Complete(signal) => (CommandStatus::Completed, None, Some(signal)),
            Detection::TimedOut => (
                CommandStatus::Timeout,
                Some(format!(
                    "no completion signal within {}ms",
                    self.config.command_timeout.as_millis()
                )),
                None,
            ),
        };

        let cmd = slot.command.take()?;
        drop(slot);
        if let Some(signal) = signal {
            tracing::debug!(target_id = %self.target_id, command_id = %cmd.id, ?signal, "Command completed");
        } else {
            tracing::warn!(
                target_id = %self.target_id,
                command_id = %cmd.id,
                command = %cmd.command,
                "Command timed out"
            );
        }
        self.finish(cmd, status, error);
        None
    }

    /// Deliver the result. The execution lock is released first so the
    /// caller can issue its next command as soon as it has the result.
    fn finish(&self, cmd: PendingCommand, status: CommandStatus, error: Option<String>) {
        let PendingCommand {
            id,
            command,
            output,
            mut throttler,
            reply,
            guard,
            ..
        } = cmd;
        let text = match &reply {
            Reply::Batched(_) => throttler.drain().concat(),
            Reply::Streaming(tx) => {
                for piece in throttler.drain() {
                    let _ = tx.send(CommandEvent::Output(piece));
                }
                output
            }
        };
        let result = CommandResult {
            id,
            status,
            output: output::assemble(&text, &command, &self.patterns),
            error,
        };
        drop(guard);
        match reply {
            Reply::Batched(tx) => {
                let _ = tx.send(result);
            }
            Reply::Streaming(tx) => {
                let _ = tx.send(CommandEvent::Finished(result));
            }
        }
    }

    /// Mark the session closed and take the outstanding command. `None` if
    /// it was already closed.
    fn seal(&self) -> Option<Option<PendingCommand>> {
        let mut slot = self.slot();
        if slot.closed {
            return None;
        }
        slot.closed = true;
        Some(slot.command.take())
    }

    async fn fail(&self, reason: String) {
        let Some(pending) = self.seal() else {
            return;
        };
        tracing::warn!(target_id = %self.target_id, %reason, "Shell session lost");
        self.transport.close().await;
        if let Some(cmd) = pending {
            self.finish(cmd, CommandStatus::Failed, Some(reason.clone()));
        }
        self.emit(EngineEvent::SessionLost(reason));
    }

    async fn close(&self) {
        let Some(pending) = self.seal() else {
            return;
        };
        let _ = self.shutdown.send(true);
        self.transport.close().await;
        if let Some(cmd) = pending {
            self.finish(cmd, CommandStatus::Failed, Some("session closed".into()));
        }
        tracing::info!(target_id = %self.target_id, "Shell session closed");
    }
}

async fn read_loop(
    inner: Weak<Inner>,
    mut shutdown: watch::Receiver<bool>,
    mut idle: OutputThrottler,
) {
    let mut decoder = TextDecoder::new();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = inner.transport.read_available(READ_CHUNK) => read,
        };
        match read {
            Ok(bytes) => {
                let text = decoder.push(&bytes);
                let Some(key) = inner.tick(&text, Instant::now(), &mut idle) else {
                    continue;
                };
                if let Err(e) = inner.transport.write(&key).await {
                    inner.fail(e.to_string()).await;
                    break;
                }
            }
            Err(e) => {
                inner.fail(e.to_string()).await;
                break;
            }
        }
    }
}
