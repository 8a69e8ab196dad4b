//! File-based credential storage.
//!
//! Layout of the credential directory:
//! - `creds.json` - credential object
//! - `keys/{id}.json` - one file per signal key, id percent-encoded

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::credentials::{CredentialState, CredentialStore, KeyUpdates};
use crate::store::error::{StorageError, StorageResult};

const CREDS_FILE: &str = "creds.json";
const KEYS_DIR: &str = "keys";

/// File-based implementation of `CredentialStore`.
#[derive(Debug)]
pub struct FileCredentialStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles on `creds.json`.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Create a store rooted at `dir`. The directory is created on first load.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    fn keys_dir(&self) -> PathBuf {
        self.dir.join(KEYS_DIR)
    }

    fn key_path(&self, id: &str) -> PathBuf {
        self.keys_dir().join(format!("{}.json", encode_key_id(id)))
    }

    async fn ensure_dir(path: &Path) -> StorageResult<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| StorageError::file_io(path, e))
    }

    async fn read_json(path: &Path) -> StorageResult<Option<serde_json::Value>> {
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::file_io(path, e)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StorageError::file_deserialization(path, e.to_string()))
    }

    async fn write_json(path: &Path, value: &serde_json::Value) -> StorageResult<()> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        let tmp_path = path.with_extension("json.tmp");
        super::atomic_write_file(&tmp_path, path, &content).await
    }

    async fn load_keys(&self) -> StorageResult<BTreeMap<String, serde_json::Value>> {
        let keys_dir = self.keys_dir();
        let mut keys = BTreeMap::new();

        let mut entries = match fs::read_dir(&keys_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(StorageError::file_io(&keys_dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::file_io(&keys_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(value) = Self::read_json(&path).await? {
                keys.insert(decode_key_id(stem), value);
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> StorageResult<CredentialState> {
        Self::ensure_dir(&self.dir).await?;

        let Some(creds) = Self::read_json(&self.creds_path()).await? else {
            debug!(dir = %self.dir.display(), "No stored credentials, starting fresh");
            return Ok(CredentialState::fresh());
        };

        Ok(CredentialState {
            creds,
            keys: self.load_keys().await?,
            fresh: false,
        })
    }

    async fn save_creds(&self, update: &serde_json::Value) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        Self::ensure_dir(&self.dir).await?;

        let path = self.creds_path();
        let current = Self::read_json(&path).await?;
        let merged = merge_creds(current, update);
        Self::write_json(&path, &merged).await?;

        debug!(path = %path.display(), "Saved credentials");
        Ok(())
    }

    async fn save_keys(&self, updates: &KeyUpdates) -> StorageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let keys_dir = self.keys_dir();
        Self::ensure_dir(&keys_dir).await?;

        for (id, value) in updates {
            let path = self.key_path(id);
            match value {
                Some(value) => Self::write_json(&path, value).await?,
                None => match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(StorageError::file_io(&path, e)),
                },
            }
        }

        debug!(count = updates.len(), "Saved signal keys");
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Shallow merge: top-level fields of `update` replace stored ones.
fn merge_creds(
    current: Option<serde_json::Value>,
    update: &serde_json::Value,
) -> serde_json::Value {
    match (current, update) {
        (Some(serde_json::Value::Object(mut stored)), serde_json::Value::Object(fields)) => {
            for (name, value) in fields {
                stored.insert(name.clone(), value.clone());
            }
            serde_json::Value::Object(stored)
        }
        _ => update.clone(),
    }
}

/// Key ids contain `/` and `:`; keep them reversible as file names.
fn encode_key_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            ':' => out.push_str("%3A"),
            '\\' => out.push_str("%5C"),
            _ => out.push(c),
        }
    }
    out
}

fn decode_key_id(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let decoded = match rest.get(pos + 1..pos + 3) {
            Some("25") => Some('%'),
            Some("2F") => Some('/'),
            Some("3A") => Some(':'),
            Some("5C") => Some('\\'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[pos + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_creates_directory_and_returns_fresh_state() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("auth");
        let store = FileCredentialStore::new(&dir);

        let state = store.load().await.unwrap();

        assert!(dir.is_dir());
        assert!(state.fresh);
        assert_eq!(state.creds, json!({}));
        assert!(state.keys.is_empty());
    }

    #[tokio::test]
    async fn save_creds_merges_partial_updates() {
        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path());

        let paired = json!({
            "me": {"id": "923000000000:1@s.whatsapp.net"},
            "registered": false
        });
        store.save_creds(&paired).await.unwrap();
        store.save_creds(&json!({"registered": true})).await.unwrap();

        let state = store.load().await.unwrap();
        assert!(!state.fresh);
        assert_eq!(state.creds["registered"], json!(true));
        assert_eq!(state.creds["me"]["id"], json!("923000000000:1@s.whatsapp.net"));
        assert!(!tmp.path().join("creds.json.tmp").exists());
    }

    #[tokio::test]
    async fn save_keys_writes_and_deletes() {
        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path());
        store.save_creds(&json!({"registered": true})).await.unwrap();

        let mut updates = KeyUpdates::new();
        updates.insert("pre-key:1".to_string(), Some(json!({"public": "abc"})));
        updates.insert("session:923/0".to_string(), Some(json!({"s": 1})));
        store.save_keys(&updates).await.unwrap();

        let state = store.load().await.unwrap();
        assert_eq!(state.keys.len(), 2);
        assert_eq!(state.keys["pre-key:1"], json!({"public": "abc"}));
        assert_eq!(state.keys["session:923/0"], json!({"s": 1}));

        let mut deletes = KeyUpdates::new();
        deletes.insert("pre-key:1".to_string(), None);
        deletes.insert("never-stored".to_string(), None);
        store.save_keys(&deletes).await.unwrap();

        let state = store.load().await.unwrap();
        assert_eq!(state.keys.len(), 1);
        assert!(state.keys.contains_key("session:923/0"));
    }

    #[tokio::test]
    async fn corrupt_creds_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("creds.json"), "{not json").unwrap();
        let store = FileCredentialStore::new(tmp.path());

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, StorageError::FileDeserialization { .. }));
    }

    #[test]
    fn key_id_encoding_round_trips_separators() {
        for id in ["app-state-sync-key:AAA/BBB", "100%:x", "plain"] {
            let encoded = encode_key_id(id);
            assert!(!encoded.contains('/'));
            assert!(!encoded.contains(':'));
            assert_eq!(decode_key_id(&encoded), id);
        }
    }

    #[test]
    fn merge_replaces_non_object_state() {
        let merged = merge_creds(Some(json!("garbage")), &json!({"a": 1}));
        assert_eq!(merged, json!({"a": 1}));
        let merged = merge_creds(None, &json!({"a": 1}));
        assert_eq!(merged, json!({"a": 1}));
    }
}
