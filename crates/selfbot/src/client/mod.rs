//! Boundary to the WhatsApp Web protocol client.
//!
//! The protocol itself is out of reach of this crate. What the rest of the
//! agent sees is:
//!
//! - [`ClientFactory`]: opens a connection from a version and credential state
//! - [`Session`]: the live connection handle (send a reply, close)
//! - [`SessionEvent`]: the stream of things the connection reports
//! - [`VersionSource`]: discovers the WhatsApp Web version to announce
//!
//! [`bridge`] implements the factory on top of a bridge subprocess speaking
//! JSON Lines over stdio.

pub mod bridge;
pub mod error;
pub mod version;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use bridge::BridgeClientFactory;
pub use error::ClientError;
pub use selfbot_bridge_protocol::{
    ConnectionPhase, ConnectionTimeouts, ConnectionUpdate, DisconnectInfo, DisconnectReason,
    InboundMessage, ProtocolVersion, UpsertKind,
};
pub use version::{FixedVersionSource, HttpVersionSource, VersionInfo, VersionSource};

use crate::store::{CredentialState, KeyUpdates};

// ============================================================================
// Events
// ============================================================================

/// Something a live connection reported.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Partial credential object to persist.
    CredsUpdate(serde_json::Value),
    /// Signal key changes to persist.
    KeysUpdate(KeyUpdates),
    /// Connection phase change, QR request, or disconnect.
    Connection(ConnectionUpdate),
    /// Inbound messages.
    Messages(MessageBatch),
}

/// A batch of inbound messages delivered together.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    pub kind: UpsertKind,
    pub messages: Vec<InboundMessage>,
}

impl MessageBatch {
    /// A live batch with a single message.
    pub fn notify(message: InboundMessage) -> Self {
        Self {
            kind: UpsertKind::Notify,
            messages: vec![message],
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Live connection handle.
#[async_trait]
pub trait Session: Send + Sync {
    /// Identifier for logs.
    fn id(&self) -> &str;

    /// Send a text message to a conversation.
    async fn send_text(&self, jid: &str, text: &str) -> Result<(), ClientError>;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), ClientError>;
}

/// A freshly opened session and the receiving end of its events.
pub struct Connection {
    pub session: Arc<dyn Session>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Everything needed to open a connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub version: ProtocolVersion,
    pub credentials: CredentialState,
    pub timeouts: ConnectionTimeouts,
}

/// Opens connections.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, options: ConnectOptions) -> Result<Connection, ClientError>;
}
