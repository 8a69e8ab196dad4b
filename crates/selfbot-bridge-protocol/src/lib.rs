//! Bridge Protocol types for communication between selfbot and the WhatsApp bridge.
//!
//! The WhatsApp Web protocol client runs in a separate bridge process. This
//! crate defines everything the two sides say to each other.
//!
//! # Protocol Overview
//!
//! The protocol is bidirectional with JSON Lines (newline-delimited JSON) over stdio:
//!
//! - **Commands** (selfbot → bridge): connect, send a text reply, close
//! - **Events** (bridge → selfbot): credential updates, connection updates,
//!   inbound message batches, command acknowledgements
//!
//! # Example: Minimal Bridge Loop
//!
//! ```ignore
//! use selfbot_bridge_protocol::{BridgeCommand, BridgeEvent};
//!
//! let line = read_line_from_stdin();
//! let command: BridgeCommand = serde_json::from_str(&line)?;
//!
//! let event = BridgeEvent::Ready {
//!     bridge: "baileys".to_string(),
//!     version: "6.7.0".to_string(),
//! };
//! println!("{}", serde_json::to_string(&event)?);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Commands (selfbot → bridge)
// ============================================================================

/// Commands sent from selfbot to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Open a WhatsApp Web connection with the given credential state.
    Connect {
        version: ProtocolVersion,
        /// Stored credential object, `{}` when the account was never paired.
        creds: serde_json::Value,
        /// Stored signal keys by key id.
        #[serde(default)]
        keys: BTreeMap<String, serde_json::Value>,
        timeouts: ConnectionTimeouts,
    },

    /// Send a text message to a conversation.
    SendText {
        request_id: String,
        jid: String,
        text: String,
    },

    /// Close the connection and exit.
    Close,
}

/// Durations handed to the protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTimeouts {
    pub connect_timeout_ms: u64,
    pub default_query_timeout_ms: u64,
    pub keep_alive_interval_ms: u64,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 60_000,
            default_query_timeout_ms: 60_000,
            keep_alive_interval_ms: 30_000,
        }
    }
}

/// WhatsApp Web client version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub [u32; 3]);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}

// ============================================================================
// Events (bridge → selfbot)
// ============================================================================

/// Events sent from the bridge to selfbot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Bridge process is up and waiting for `connect`.
    Ready { bridge: String, version: String },

    /// Partial credential object to merge into the stored credentials.
    CredsUpdate { creds: serde_json::Value },

    /// Signal key changes. A `null` value deletes the key.
    KeysUpdate {
        keys: BTreeMap<String, Option<serde_json::Value>>,
    },

    /// Connection phase change, QR request, or disconnect.
    ConnectionUpdate(ConnectionUpdate),

    /// Batch of new or synced messages.
    MessagesUpsert {
        kind: UpsertKind,
        messages: Vec<InboundMessage>,
    },

    /// Command completed successfully.
    CommandOk {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    /// Command failed.
    CommandError {
        request_id: String,
        code: String,
        message: String,
    },

    /// Bridge-level error (not tied to a specific command).
    Error {
        code: String,
        message: String,
        /// Whether the bridge is going down because of this error.
        #[serde(default)]
        fatal: bool,
    },
}

/// Payload of a `connection_update` event. Every field is optional because
/// the client reports phases, QR codes and disconnects independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionPhase>,
    /// Raw QR payload to pair a new device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    /// Terminal rendering of `qr`, when the bridge can produce one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_ascii: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<DisconnectInfo>,
}

impl ConnectionUpdate {
    /// A close update carrying the given status code and message.
    pub fn closed(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            connection: Some(ConnectionPhase::Close),
            last_disconnect: Some(DisconnectInfo {
                status_code,
                message: message.into(),
            }),
            ..Default::default()
        }
    }

    /// An update reporting the connection is open.
    pub fn open() -> Self {
        Self {
            connection: Some(ConnectionPhase::Open),
            ..Default::default()
        }
    }

    /// An update carrying a QR code to scan.
    pub fn qr(qr: impl Into<String>) -> Self {
        Self {
            qr: Some(qr.into()),
            ..Default::default()
        }
    }

    /// Classify the disconnect carried by this update.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        DisconnectReason::from_status_code(
            self.last_disconnect.as_ref().and_then(|d| d.status_code),
        )
    }
}

/// Connection phase reported by the protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// Error attached to a close update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: String,
}

/// Why the protocol client closed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    LoggedOut,
    BadSession,
    RestartRequired,
    MultideviceMismatch,
    Forbidden,
    UnavailableService,
    Unknown(Option<u16>),
}

impl DisconnectReason {
    /// Map a WhatsApp Web status code to a reason.
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(403) => Self::Forbidden,
            Some(408) => Self::ConnectionLost,
            Some(411) => Self::MultideviceMismatch,
            Some(428) => Self::ConnectionClosed,
            Some(440) => Self::ConnectionReplaced,
            Some(500) => Self::BadSession,
            Some(503) => Self::UnavailableService,
            Some(515) => Self::RestartRequired,
            other => Self::Unknown(other),
        }
    }

    /// Whether reconnecting can succeed. Only an explicit logout invalidates
    /// the stored credentials.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionClosed => f.write_str("connection closed"),
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::ConnectionReplaced => f.write_str("connection replaced"),
            Self::LoggedOut => f.write_str("logged out"),
            Self::BadSession => f.write_str("bad session"),
            Self::RestartRequired => f.write_str("restart required"),
            Self::MultideviceMismatch => f.write_str("multi-device mismatch"),
            Self::Forbidden => f.write_str("forbidden"),
            Self::UnavailableService => f.write_str("service unavailable"),
            Self::Unknown(Some(code)) => write!(f, "unknown ({code})"),
            Self::Unknown(None) => f.write_str("unknown"),
        }
    }
}

/// Kind of a `messages_upsert` batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertKind {
    /// Live messages received while connected.
    Notify,
    /// Messages replayed by history sync.
    Append,
}

// ============================================================================
// Messages
// ============================================================================

/// An inbound message, in the protocol client's own shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub key: MessageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<u64>,
}

impl InboundMessage {
    /// A plain text message in `jid`.
    pub fn text(jid: impl Into<String>, from_me: bool, text: impl Into<String>) -> Self {
        Self {
            key: MessageKey {
                remote_jid: Some(jid.into()),
                from_me,
                ..Default::default()
            },
            message: Some(MessagePayload {
                conversation: Some(text.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Text body: the plain conversation field, else the extended text.
    pub fn body(&self) -> Option<&str> {
        let payload = self.message.as_ref()?;
        payload
            .conversation
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| {
                payload
                    .extended_text_message
                    .as_ref()
                    .and_then(|ext| ext.text.as_deref())
            })
    }
}

/// Addressing information of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

/// Message content. Only the text-bearing fields are modelled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedTextMessage>,
}

impl MessagePayload {
    /// Whether the payload carries no field at all.
    pub fn is_empty(&self) -> bool {
        self.conversation.is_none() && self.extended_text_message.is_none()
    }
}

/// Rich text message (links, quotes, mentions).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedTextMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// ============================================================================
// Error Codes
// ============================================================================

/// Well-known error codes for `command_error` and `error` events.
pub mod error_codes {
    /// Not connected to WhatsApp.
    pub const NOT_CONNECTED: &str = "not_connected";
    /// Sending the message failed.
    pub const SEND_FAILED: &str = "send_failed";
    /// Malformed command from selfbot.
    pub const INVALID_REQUEST: &str = "invalid_request";
    /// Protocol client crashed.
    pub const CLIENT_ERROR: &str = "client_error";
}
