//! SSH-backed remote shell sessions.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use fwconsole_core::{ConnectError, EngineConfig, RemoteTarget};
use russh::{
    ChannelMsg, Disconnect,
    client::{self, Handle, Msg},
    keys::ssh_key::PublicKey,
};
use secrecy::ExposeSecret;

use crate::{
    pipe::{Inbound, Outbound, PipeEnd, ShellPipe},
    transport::{Connector, ShellTransport, TransportError},
};

/// Terminal size requested for the PTY. Wide columns keep devices from
/// wrapping table output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    pub cols: u32,
    pub rows: u32,
}

impl Default for PtySize {
    fn default() -> Self {
        Self { cols: 240, rows: 48 }
    }
}

/// Opens [`RemoteShellSession`]s with password authentication.
#[derive(Debug, Clone)]
pub struct SshConnector {
    connect_timeout: Duration,
    poll_interval: Duration,
    pty: PtySize,
    keepalive: Duration,
}

impl SshConnector {
    /// Create a connector using the engine's connect and poll timings.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            poll_interval: config.poll_interval,
            pty: PtySize::default(),
            keepalive: Duration::from_secs(30),
        }
    }

    async fn establish(&self, target: &RemoteTarget) -> Result<RemoteShellSession, ConnectError> {
        let address = target.address();
        let network = |e: russh::Error| ConnectError::Network {
            address: address.clone(),
            reason: e.to_string(),
        };
        let protocol = |e: russh::Error| ConnectError::Protocol {
            address: address.clone(),
            reason: e.to_string(),
        };

        let config = Arc::new(client::Config {
            keepalive_interval: Some(self.keepalive),
            ..Default::default()
        });
        let handler = HostKeyLogger {
            address: address.clone(),
        };

        let mut handle = client::connect(config, (target.host.as_str(), target.port), handler)
            .await
            .map_err(network)?;

        let auth = handle
            .authenticate_password(
                target.credentials.username.clone(),
                target.credentials.secret.expose_secret().to_owned(),
            )
            .await
            .map_err(network)?;
        if !auth.success() {
            return Err(ConnectError::Authentication {
                username: target.credentials.username.clone(),
                address,
            });
        }

        let channel = handle.channel_open_session().await.map_err(protocol)?;
        channel
            .request_pty(false, "vt100", self.pty.cols, self.pty.rows, 0, 0, &[])
            .await
            .map_err(protocol)?;
        channel.request_shell(false).await.map_err(protocol)?;

        let (pipe, end) = ShellPipe::new(self.poll_interval);
        let label = format!("{}@{address}", target.credentials.username);
        tracing::info!(target_id = %target.id, %label, "SSH shell established");
        tokio::spawn(pump(handle, channel, end, label));

        Ok(RemoteShellSession { pipe })
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        target: &RemoteTarget,
    ) -> Result<Arc<dyn ShellTransport>, ConnectError> {
        match tokio::time::timeout(self.connect_timeout, self.establish(target)).await {
            Ok(Ok(session)) => Ok(Arc::new(session)),
            Ok(Err(e)) => {
                tracing::warn!(target_id = %target.id, error = %e, "SSH connect failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(
                    target_id = %target.id,
                    timeout = ?self.connect_timeout,
                    "SSH connect timed out"
                );
                Err(ConnectError::Timeout {
                    address: target.address(),
                    timeout: self.connect_timeout,
                })
            }
        }
    }
}

/// Accepts any host key and records what was presented.
struct HostKeyLogger {
    address: String,
}

impl client::Handler for HostKeyLogger {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            address = %self.address,
            algorithm = %server_public_key.algorithm(),
            "Accepting server host key"
        );
        Ok(true)
    }
}

/// One authenticated connection with one interactive PTY shell.
pub struct RemoteShellSession {
    pipe: ShellPipe,
}

#[async_trait]
impl ShellTransport for RemoteShellSession {
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.pipe.write(bytes).await
    }

    async fn read_available(&self, max_bytes: usize) -> Result<Vec<u8>, TransportError> {
        self.pipe.read_available(max_bytes).await
    }

    async fn close(&self) {
        self.pipe.close().await;
    }

    fn is_open(&self) -> bool {
        self.pipe.is_open()
    }
}

/// Moves bytes between the SSH channel and the pipe until either side ends.
async fn pump(
    handle: Handle<HostKeyLogger>,
    mut channel: russh::Channel<Msg>,
    mut end: PipeEnd,
    label: String,
) {
    loop {
        tokio::select! {
            outbound = end.outbound.recv() => match outbound {
                Some(Outbound::Data(bytes)) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        tracing::warn!(%label, error = %e, "SSH write failed");
                        let _ = end.inbound.send(Inbound::Failed(e.to_string()));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = channel.eof().await;
                    let _ = channel.close().await;
                    break;
                }
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. }) => {
                    if end.inbound.send(Inbound::Data(data.to_vec())).is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    tracing::debug!(%label, exit_status, "Remote shell exited");
                }
                Some(ChannelMsg::Eof | ChannelMsg::Close) | None => {
                    tracing::info!(%label, "Remote shell closed by device");
                    let _ = end.inbound.send(Inbound::Closed);
                    break;
                }
                Some(_) => {}
            },
        }
    }

    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "session closed", "en")
        .await
    {
        tracing::debug!(%label, error = %e, "SSH disconnect failed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use fwconsole_core::{Credentials, DeviceProfile, TargetId};
    use tokio::net::TcpListener;

    use super::*;

    fn target(port: u16) -> RemoteTarget {
        RemoteTarget {
            id: TargetId::new("fw-test"),
            name: "test".into(),
            host: "127.0.0.1".into(),
            port,
            credentials: Credentials::new("admin", "secret"),
            profile: DeviceProfile::default(),
        }
    }

    fn connector(timeout: Duration) -> SshConnector {
        SshConnector::new(&EngineConfig {
            connect_timeout: timeout,
            ..EngineConfig::interactive()
        })
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connector(Duration::from_secs(5))
            .connect(&target(port))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::Network { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_within_bound() {
        // Accepts TCP but never sends an SSH banner.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let started = Instant::now();
        let err = connector(Duration::from_millis(300))
            .connect(&target(port))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::Timeout { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
