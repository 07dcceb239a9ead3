//! Error types for the storage layer and the virtual filesystem.

use thiserror::Error;

/// Errors from the persistent key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] rocksdb::Error),

    /// A record failed to encode for storage.
    #[error("failed to encode record for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored value failed to decode.
    #[error("corrupt record for key {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from virtual filesystem operations.
#[derive(Debug, Error)]
pub enum VfsError {
    /// No file or directory at this path.
    #[error("path not found: {0}")]
    NotFound(String),

    /// The path is already occupied by a file or directory.
    #[error("path already exists: {0}")]
    Conflict(String),

    /// The operation does not apply to the node kind at this path,
    /// including any mutation of the root.
    #[error("invalid operation on {path}: {reason}")]
    InvalidOperation { path: String, reason: String },

    /// The store rejected a write or read.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl VfsError {
    pub(crate) fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        VfsError::InvalidOperation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for VFS operations.
pub type VfsResult<T> = Result<T, VfsError>;
