//! Persistence for the WhatsApp credential state.
//!
//! The trait lives here; the file-backed implementation lives in [`file`].

pub mod credentials;
pub mod error;
pub mod file;

pub use credentials::{CredentialState, CredentialStore, KeyUpdates};
pub use error::{StorageError, StorageResult};
pub use file::FileCredentialStore;
