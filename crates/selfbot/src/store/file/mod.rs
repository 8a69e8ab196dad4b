//! File-based storage implementations.
//!
//! All writes use atomic operations (temp file + rename) to prevent corruption.

mod credentials;

pub use credentials::FileCredentialStore;

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::error::{StorageError, StorageResult};

/// Write `contents` to `tmp_path`, fsync it, then rename it over `path`.
async fn atomic_write_file(tmp_path: &Path, path: &Path, contents: &[u8]) -> StorageResult<()> {
    let mut file = fs::File::create(tmp_path)
        .await
        .map_err(|e| StorageError::file_io(tmp_path, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| StorageError::file_io(tmp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::file_io(tmp_path, e))?;
    drop(file);

    fs::rename(tmp_path, path)
        .await
        .map_err(|e| StorageError::file_io(path, e))
}
