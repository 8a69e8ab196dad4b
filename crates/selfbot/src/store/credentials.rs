//! Credential store trait.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::error::StorageResult;

/// Signal key changes: `None` deletes the key.
pub type KeyUpdates = BTreeMap<String, Option<serde_json::Value>>;

/// Everything the protocol client needs to resume a paired session.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialState {
    /// Credential object, `{}` before the first pairing.
    pub creds: serde_json::Value,
    /// Signal keys by key id.
    pub keys: BTreeMap<String, serde_json::Value>,
    /// True when nothing was stored yet, so the client will ask for a QR scan.
    pub fresh: bool,
}

impl CredentialState {
    /// State of an account that was never paired.
    pub fn fresh() -> Self {
        Self {
            creds: serde_json::Value::Object(serde_json::Map::new()),
            keys: BTreeMap::new(),
            fresh: true,
        }
    }
}

/// Storage backend for credential state.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load stored credentials, or a fresh state when none exist.
    async fn load(&self) -> StorageResult<CredentialState>;

    /// Merge a partial credential update into the stored credentials.
    async fn save_creds(&self, update: &serde_json::Value) -> StorageResult<()>;

    /// Apply signal key changes.
    async fn save_keys(&self, updates: &KeyUpdates) -> StorageResult<()>;
}
