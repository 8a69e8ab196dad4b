//! WhatsApp conversation identifiers (JIDs).
//!
//! A JID is `user@server`. The server part tells what kind of conversation it
//! is: a person, a group, or a linked identity alias.

/// Server of one-to-one chats with a phone number.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Server of group chats.
pub const GROUP_SERVER: &str = "g.us";

/// Server of linked-identity (LID) aliases.
pub const LID_SERVER: &str = "lid";

/// Chat JID of a phone number.
pub fn user_jid(number: &str) -> String {
    format!("{number}@{USER_SERVER}")
}

/// Whether the JID addresses a group.
pub fn is_group(jid: &str) -> bool {
    server(jid) == Some(GROUP_SERVER)
}

/// Whether the JID is a linked-identity alias instead of a phone number.
pub fn is_lid(jid: &str) -> bool {
    server(jid) == Some(LID_SERVER)
}

fn server(jid: &str) -> Option<&str> {
    jid.rsplit_once('@').map(|(_, server)| server)
}
