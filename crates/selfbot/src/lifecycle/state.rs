use std::fmt;

use thiserror::Error;

use crate::client::ClientError;
use crate::store::StorageError;

/// Why the agent stopped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The server invalidated the session. The credentials are useless now.
    LoggedOut,
    /// The operator asked the process to stop.
    Shutdown,
}

impl StopReason {
    /// Process exit code for this reason.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::LoggedOut => 1,
            Self::Shutdown => 0,
        }
    }
}

/// Where the connection lifecycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No live session. A reconnect may be scheduled.
    Disconnected,
    /// A start attempt is running or waiting for the handshake.
    Connecting,
    /// The session is open and messages are being handled.
    Connected,
    /// Terminal. Nothing reconnects after this.
    Stopped(StopReason),
}

impl LifecycleState {
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped(_))
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Stopped(StopReason::LoggedOut) => f.write_str("stopped (logged out)"),
            Self::Stopped(StopReason::Shutdown) => f.write_str("stopped (shutdown)"),
        }
    }
}

/// A start attempt that did not produce a session.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to load credentials: {0}")]
    Credentials(#[from] StorageError),

    #[error("failed to open connection: {0}")]
    Connect(#[from] ClientError),
}
