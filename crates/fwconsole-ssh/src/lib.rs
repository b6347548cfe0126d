//! Interactive shell transport for appliance CLIs.
//!
//! Provides:
//! - `ShellTransport` / `Connector` - the contract the engine drives
//! - `SshConnector` - russh-backed PTY shells
//! - `ScriptedDevice` - in-memory CLI for tests (feature: testing)

pub mod pipe;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use pipe::ShellPipe;
pub use session::{PtySize, RemoteShellSession, SshConnector};
pub use transport::{Connector, ShellTransport, TransportError};

#[cfg(any(test, feature = "testing"))]
pub use scripted::{ConnectBehavior, DeviceLog, ScriptedConnector, ScriptedDevice, Step};
