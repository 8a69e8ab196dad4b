//! Decides whether an inbound message is a command from the owner.

use std::fmt;

use selfbot_bridge_protocol::InboundMessage;

use crate::jid;

/// Prefix of every reply the agent sends.
pub const REPLY_MARKER: &str = "🤖";

/// Prefix that marks a message as a command.
pub const COMMAND_PREFIX: char = '/';

/// Why a message was not treated as a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NoPayload,
    NoConversation,
    Group,
    LinkedIdentity,
    NotFromMe,
    NotSelfChat,
    NoText,
    OwnReply,
    NotCommand,
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoPayload => "no message payload",
            Self::NoConversation => "no conversation id",
            Self::Group => "group conversation",
            Self::LinkedIdentity => "linked identity conversation",
            Self::NotFromMe => "not sent by the owner",
            Self::NotSelfChat => "not the owner self-chat",
            Self::NoText => "no text body",
            Self::OwnReply => "agent reply",
            Self::NotCommand => "not a command",
        })
    }
}

/// A message that passed every filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted<'a> {
    /// Conversation to reply to.
    pub jid: &'a str,
    /// Trimmed text, starting with the command prefix.
    pub text: &'a str,
}

/// Run the filter chain. The first failing check decides the skip reason.
pub fn accept<'a>(message: &'a InboundMessage, owner_jid: &str) -> Result<Accepted<'a>, Skip> {
    if message.message.as_ref().is_none_or(|payload| payload.is_empty()) {
        return Err(Skip::NoPayload);
    }

    let Some(jid) = message
        .key
        .remote_jid
        .as_deref()
        .filter(|jid| !jid.is_empty())
    else {
        return Err(Skip::NoConversation);
    };

    if jid::is_group(jid) {
        return Err(Skip::Group);
    }
    if jid::is_lid(jid) {
        return Err(Skip::LinkedIdentity);
    }
    if !message.key.from_me {
        return Err(Skip::NotFromMe);
    }
    if jid != owner_jid {
        return Err(Skip::NotSelfChat);
    }

    let text = message.body().map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Err(Skip::NoText);
    }
    if text.starts_with(REPLY_MARKER) {
        return Err(Skip::OwnReply);
    }
    if !text.starts_with(COMMAND_PREFIX) {
        return Err(Skip::NotCommand);
    }

    Ok(Accepted { jid, text })
}
