use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

use selfbot_bridge_protocol::{ConnectionTimeouts, ProtocolVersion};

use crate::jid;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub owner: OwnerConfig,
    /// Credential directory. Relative paths are resolved against the config file.
    #[serde(default = "default_auth_dir")]
    pub auth_dir: PathBuf,
    /// Fixed delay before reconnecting after a recoverable close.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub version: VersionConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,

    #[error("owner.number is required")]
    MissingOwner,

    #[error("owner.number must contain digits only (no '+', spaces or dashes), got '{0}'")]
    InvalidOwner(String),

    #[error("bridge.command is empty")]
    MissingBridgeCommand,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner: OwnerConfig::default(),
            auth_dir: default_auth_dir(),
            reconnect_delay_ms: default_reconnect_delay(),
            bridge: BridgeConfig::default(),
            connection: ConnectionConfig::default(),
            version: VersionConfig::default(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }

    /// Check the values that have no usable default.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let number = self.owner.number.trim();
        if number.is_empty() {
            return Err(ConfigError::MissingOwner);
        }
        if !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::InvalidOwner(number.to_string()));
        }
        if self.bridge.command.trim().is_empty() {
            return Err(ConfigError::MissingBridgeCommand);
        }
        Ok(())
    }

    /// JID of the owner's chat with themself.
    pub fn owner_jid(&self) -> String {
        jid::user_jid(self.owner.number.trim())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Resolve a path relative to the config file directory.
///
/// Absolute paths are returned unchanged.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Defaults
// ============================================================================

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "selfbot.yaml";
/// Default credential directory (relative to the config file).
pub const DEFAULT_AUTH_DIR: &str = "auth";
/// Default bridge executable.
pub const DEFAULT_BRIDGE_COMMAND: &str = "selfbot-bridge";
/// Where the protocol library publishes its current WhatsApp Web version.
pub const DEFAULT_VERSION_URL: &str =
    "https://raw.githubusercontent.com/WhiskeySockets/Baileys/master/src/Defaults/baileys-version.json";

fn default_auth_dir() -> PathBuf {
    PathBuf::from(DEFAULT_AUTH_DIR)
}

fn default_reconnect_delay() -> u64 {
    3000
}

fn default_bridge_command() -> String {
    DEFAULT_BRIDGE_COMMAND.to_string()
}

fn default_version_url() -> String {
    DEFAULT_VERSION_URL.to_string()
}

fn default_connect_timeout() -> u64 {
    60_000
}

fn default_query_timeout() -> u64 {
    60_000
}

fn default_keep_alive_interval() -> u64 {
    30_000
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand `${VAR}`, `${VAR:-default}` and `$$` in the raw config text.
///
/// A `$` not followed by `{` or `$` is kept as is. Nested references are not
/// supported.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(tail) = after.strip_prefix('{') {
            let end = tail.find('}').ok_or(ConfigError::UnclosedVarReference)?;
            out.push_str(&lookup_var(&tail[..end])?);
            rest = &tail[end + 1..];
        } else {
            out.push('$');
            rest = after;
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn lookup_var(reference: &str) -> Result<String, ConfigError> {
    let (name, default) = match reference.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (reference, None),
    };

    match (std::env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

// ============================================================================
// OwnerConfig
// ============================================================================

/// The single account owner allowed to issue commands.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OwnerConfig {
    /// Phone number in international format, digits only.
    #[serde(default, deserialize_with = "string_or_number")]
    pub number: String,

    /// Name used in the greeting reply.
    #[serde(default)]
    pub name: Option<String>,
}

/// Phone numbers are often written unquoted in YAML.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

// ============================================================================
// BridgeConfig
// ============================================================================

/// How to launch the WhatsApp protocol bridge process.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Command to execute (path to binary or script).
    #[serde(default = "default_bridge_command")]
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables to set.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Durations handed to the protocol client.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_query_timeout")]
    pub default_query_timeout_ms: u64,
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            default_query_timeout_ms: default_query_timeout(),
            keep_alive_interval_ms: default_keep_alive_interval(),
        }
    }
}

impl ConnectionConfig {
    pub fn timeouts(&self) -> ConnectionTimeouts {
        ConnectionTimeouts {
            connect_timeout_ms: self.connect_timeout_ms,
            default_query_timeout_ms: self.default_query_timeout_ms,
            keep_alive_interval_ms: self.keep_alive_interval_ms,
        }
    }
}

// ============================================================================
// VersionConfig
// ============================================================================

/// WhatsApp Web version discovery.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionConfig {
    /// JSON document of the form `{"version": [a, b, c]}`.
    #[serde(default = "default_version_url")]
    pub url: String,

    /// Skip discovery and always use this version.
    #[serde(default)]
    pub pinned: Option<ProtocolVersion>,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            url: default_version_url(),
            pinned: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
