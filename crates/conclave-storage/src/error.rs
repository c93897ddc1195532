//! Error types for the storage layer (grounded on `restflow-ai/src/error.rs`'s
//! per-crate `thiserror` enum convention).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("file lock poisoned or unavailable: {0}")]
    Lock(String),

    #[error("malformed record skipped at {path}:{line}: {reason}")]
    MalformedRecord {
        path: String,
        line: usize,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;
