//! Slash command table.

use chrono::{DateTime, TimeZone};

use super::filter::{COMMAND_PREFIX, REPLY_MARKER};

/// Local timestamp layout of the `/time` reply, e.g. `3/14/2025, 9:05:07 PM`.
const TIME_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

/// A recognised command keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Hi,
    Time,
    Other(String),
}

impl Command {
    /// Parse the trimmed text of an accepted message.
    ///
    /// The keyword is everything after the leading `/`, trimmed and
    /// lower-cased.
    pub fn parse(text: &str) -> Self {
        let keyword = text
            .strip_prefix(COMMAND_PREFIX)
            .unwrap_or(text)
            .trim()
            .to_lowercase();

        match keyword.as_str() {
            "ping" => Self::Ping,
            "hi" => Self::Hi,
            "time" => Self::Time,
            _ => Self::Other(keyword),
        }
    }

    pub fn keyword(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Hi => "hi",
            Self::Time => "time",
            Self::Other(keyword) => keyword,
        }
    }

    /// Reply text. Every reply starts with the reply marker.
    pub fn reply<Tz>(&self, now: &DateTime<Tz>, owner_name: Option<&str>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        match self {
            Self::Ping => format!("{REPLY_MARKER} pong"),
            Self::Hi => match owner_name.map(str::trim).filter(|name| !name.is_empty()) {
                Some(name) => format!("{REPLY_MARKER} Hello {name} 🚀"),
                None => format!("{REPLY_MARKER} Hello 🚀"),
            },
            Self::Time => format!("{REPLY_MARKER} {}", now.format(TIME_FORMAT)),
            Self::Other(keyword) => format!("{REPLY_MARKER} Command received: {keyword}"),
        }
    }
}
