//! selfbot: a personal WhatsApp agent that answers slash commands the account
//! owner sends to their own chat.
//!
//! The WhatsApp Web protocol is spoken by an external bridge process (see
//! [`client::bridge`]). This crate owns the connection lifecycle around it and
//! the command pipeline on top of it.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod display;
pub mod jid;
pub mod lifecycle;
pub mod store;
