//! Errors raised by the protocol client boundary.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to spawn bridge '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bridge I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode bridge command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("session closed")]
    Closed,

    #[error("bridge did not answer within {0:?}")]
    Timeout(Duration),

    #[error("bridge rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
}
