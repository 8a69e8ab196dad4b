//! Command dispatcher.
//!
//! Turns slash commands the owner types in their own chat into a single reply
//! in that chat. Everything else is ignored.

mod commands;
mod filter;

pub use commands::Command;
pub use filter::{Accepted, COMMAND_PREFIX, REPLY_MARKER, Skip, accept};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use selfbot_bridge_protocol::InboundMessage;

use crate::client::{MessageBatch, Session};
use crate::lifecycle::MessageHandler;

/// Replies to the owner's slash commands.
pub struct CommandDispatcher {
    owner_jid: String,
    owner_name: Option<String>,
}

impl CommandDispatcher {
    pub fn new(owner_jid: impl Into<String>, owner_name: Option<String>) -> Self {
        Self {
            owner_jid: owner_jid.into(),
            owner_name,
        }
    }

    /// Filter one message and answer it if it is a command.
    ///
    /// Returns the reply that was sent, if any. Send failures are logged and
    /// reported as no reply.
    pub async fn dispatch(
        &self,
        session: &dyn Session,
        message: &InboundMessage,
    ) -> Option<String> {
        let accepted = match accept(message, &self.owner_jid) {
            Ok(accepted) => accepted,
            Err(reason) => {
                debug!(
                    jid = message.key.remote_jid.as_deref().unwrap_or_default(),
                    reason = %reason,
                    "Ignoring message"
                );
                return None;
            }
        };

        let command = Command::parse(accepted.text);
        info!(command = %command.keyword(), "Command received");

        let reply = command.reply(&chrono::Local::now(), self.owner_name.as_deref());
        match session.send_text(accepted.jid, &reply).await {
            Ok(()) => Some(reply),
            Err(e) => {
                error!(
                    session = %session.id(),
                    command = %command.keyword(),
                    error = %e,
                    "Failed to send reply"
                );
                None
            }
        }
    }
}

#[async_trait]
impl MessageHandler for CommandDispatcher {
    async fn handle_batch(&self, session: &Arc<dyn Session>, batch: MessageBatch) {
        // Both kinds go through the filters: `append` also carries messages
        // that arrived while we were offline
        debug!(kind = ?batch.kind, count = batch.messages.len(), "Message batch");
        for message in &batch.messages {
            self.dispatch(session.as_ref(), message).await;
        }
    }
}
