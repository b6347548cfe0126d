//! In-memory scripted device.
//!
//! Behaves like a small appliance CLI: echoes input lines, replays canned
//! responses with delays and pager stops, then prints its prompt. Used to
//! exercise the engine without a network.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use fwconsole_core::{ConnectError, RemoteTarget, TargetId};

use crate::{
    pipe::{Inbound, Outbound, PipeEnd, ShellPipe},
    transport::{Connector, ShellTransport},
};

/// One step of a scripted response.
#[derive(Debug, Clone)]
pub enum Step {
    /// Send text to the caller.
    Emit(String),
    /// Pause before the next step.
    Delay(Duration),
    /// Stop until the caller sends any keystroke (a pager stop).
    AwaitKey,
    /// Drop the connection as if the link failed.
    Drop,
}

impl Step {
    /// Emit a single line terminated with CRLF.
    #[must_use]
    pub fn line(text: impl AsRef<str>) -> Self {
        Self::Emit(format!("{}\r\n", text.as_ref()))
    }
}

/// What the device has seen, for assertions.
#[derive(Debug, Default, Clone)]
pub struct DeviceLog {
    inner: Arc<Mutex<LogInner>>,
}

#[derive(Debug, Default)]
struct LogInner {
    commands: Vec<String>,
    keystrokes: Vec<Vec<u8>>,
}

impl DeviceLog {
    /// Complete command lines received, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|l| l.commands.clone())
            .unwrap_or_default()
    }

    /// Keystrokes consumed at pager stops.
    #[must_use]
    pub fn pager_keys(&self) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .map(|l| l.keystrokes.clone())
            .unwrap_or_default()
    }

    fn push_command(&self, command: &str) {
        if let Ok(mut l) = self.inner.lock() {
            l.commands.push(command.to_string());
        }
    }

    fn push_key(&self, key: &[u8]) {
        if let Ok(mut l) = self.inner.lock() {
            l.keystrokes.push(key.to_vec());
        }
    }
}

/// Scripted appliance CLI.
#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    prompt: String,
    echo: bool,
    banner: Vec<Step>,
    responses: HashMap<String, Vec<Step>>,
    log: DeviceLog,
}

impl ScriptedDevice {
    /// Device with the given prompt. An empty prompt is never printed.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            echo: true,
            banner: Vec::new(),
            responses: HashMap::new(),
            log: DeviceLog::default(),
        }
    }

    /// Do not echo received lines.
    #[must_use]
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Steps played on connect, before the first prompt.
    #[must_use]
    pub fn with_banner(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.banner = steps.into_iter().collect();
        self
    }

    /// Script the response to one command line.
    #[must_use]
    pub fn respond(mut self, command: impl Into<String>, steps: impl IntoIterator<Item = Step>) -> Self {
        self.responses
            .insert(command.into(), steps.into_iter().collect());
        self
    }

    /// Handle to what this device (and its clones) receive.
    #[must_use]
    pub fn log(&self) -> DeviceLog {
        self.log.clone()
    }

    /// Start the device and return the caller's transport.
    #[must_use]
    pub fn spawn(self, poll_interval: Duration) -> Arc<dyn ShellTransport> {
        let (pipe, end) = ShellPipe::new(poll_interval);
        tokio::spawn(self.run(end));
        Arc::new(pipe)
    }

    async fn run(self, mut end: PipeEnd) {
        let banner = self.banner.clone();
        if !self.play(&banner, &mut end).await {
            return;
        }
        self.emit_prompt(&end);

        let mut line = Vec::new();
        while let Some(out) = end.outbound.recv().await {
            let bytes = match out {
                Outbound::Data(bytes) => bytes,
                Outbound::Close => {
                    let _ = end.inbound.send(Inbound::Closed);
                    return;
                }
            };
            for byte in bytes {
                if byte != b'\n' && byte != b'\r' {
                    line.push(byte);
                    continue;
                }
                let command = String::from_utf8_lossy(&line).trim().to_string();
                line.clear();
                if !self.execute(&command, &mut end).await {
                    return;
                }
            }
        }
    }

    async fn execute(&self, command: &str, end: &mut PipeEnd) -> bool {
        if self.echo {
            let _ = end.inbound.send(Inbound::Data(format!("{command}\r\n").into_bytes()));
        }
        if !command.is_empty() {
            self.log.push_command(command);
            let steps = self.responses.get(command).cloned().unwrap_or_else(|| {
                vec![Step::line(format!("Unknown action: {command}"))]
            });
            if !self.play(&steps, end).await {
                return false;
            }
        }
        self.emit_prompt(end);
        true
    }

    /// Returns `false` once the device has gone away.
    async fn play(&self, steps: &[Step], end: &mut PipeEnd) -> bool {
        for step in steps {
            match step {
                Step::Emit(text) => {
                    if end.inbound.send(Inbound::Data(text.clone().into_bytes())).is_err() {
                        return false;
                    }
                }
                Step::Delay(d) => tokio::time::sleep(*d).await,
                Step::AwaitKey => match end.outbound.recv().await {
                    Some(Outbound::Data(key)) => self.log.push_key(&key),
                    Some(Outbound::Close) | None => {
                        let _ = end.inbound.send(Inbound::Closed);
                        return false;
                    }
                },
                Step::Drop => {
                    let _ = end.inbound.send(Inbound::Failed("connection reset by peer".into()));
                    return false;
                }
            }
        }
        true
    }

    fn emit_prompt(&self, end: &PipeEnd) {
        if !self.prompt.is_empty() {
            let _ = end.inbound.send(Inbound::Data(self.prompt.clone().into_bytes()));
        }
    }
}

/// How a [`ScriptedConnector`] answers a connect request.
#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    /// Start a fresh copy of the device.
    Device(ScriptedDevice),
    /// Fail immediately.
    Refuse(ConnectError),
    /// Never answer; fails with a timeout after the connect timeout.
    Hang,
}

/// Connector handing out scripted devices per target.
pub struct ScriptedConnector {
    targets: HashMap<TargetId, ConnectBehavior>,
    fallback: ConnectBehavior,
    poll_interval: Duration,
    connect_timeout: Duration,
    attempts: Mutex<Vec<TargetId>>,
}

impl ScriptedConnector {
    /// Every target gets a copy of `device`.
    #[must_use]
    pub fn new(device: ScriptedDevice) -> Self {
        Self::with_fallback(ConnectBehavior::Device(device))
    }

    /// Unknown targets get `fallback`.
    #[must_use]
    pub fn with_fallback(fallback: ConnectBehavior) -> Self {
        Self {
            targets: HashMap::new(),
            fallback,
            poll_interval: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(5),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Behaviour for one specific target.
    #[must_use]
    pub fn target(mut self, id: TargetId, behavior: ConnectBehavior) -> Self {
        self.targets.insert(id, behavior);
        self
    }

    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Targets a connection was attempted for, in order.
    #[must_use]
    pub fn attempts(&self) -> Vec<TargetId> {
        self.attempts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        target: &RemoteTarget,
    ) -> Result<Arc<dyn ShellTransport>, ConnectError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(target.id.clone());
        }
        let behavior = self.targets.get(&target.id).unwrap_or(&self.fallback);
        match behavior {
            ConnectBehavior::Device(device) => Ok(device.clone().spawn(self.poll_interval)),
            ConnectBehavior::Refuse(err) => Err(err.clone()),
            ConnectBehavior::Hang => {
                tokio::time::sleep(self.connect_timeout).await;
                Err(ConnectError::Timeout {
                    address: target.address(),
                    timeout: self.connect_timeout,
                })
            }
        }
    }
}
