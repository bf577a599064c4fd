// file: src/error.rs
// description: Custom error types and result type aliases
// reference: https://docs.rs/thiserror

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Document {path} is read-only")]
    ReadOnly { path: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Run did not stop within {waited:?}; force termination or abandon the stop request")]
    CancellationTimeout { waited: Duration },

    #[error("Key {0} is reserved and cannot be modified directly")]
    ReservedKey(String),

    #[error("Run data key {key} is owned by {owner}")]
    DataOwnership { key: String, owner: String },

    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("Plugin {plugin} failed during {stage} stage: {source}")]
    Plugin {
        plugin: String,
        stage: String,
        source: anyhow::Error,
    },

    #[error("Log parsing error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("File operation failed for {path}: {source}")]
    FileOperation {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl RuntimeError {
    pub fn file_operation(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RuntimeError::FileOperation {
            path: path.into(),
            source,
        }
    }

    /// True for the programmer-error class that must halt the current operation.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, RuntimeError::InvariantViolation(_))
    }
}
