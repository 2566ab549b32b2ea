//! Error types for av-storage

use thiserror::Error;

/// Errors that can occur at the object storage boundary
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object does not exist at the requested location
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Bucket or key is not usable as a storage location
    #[error("Invalid object location {bucket}/{key}: {reason}")]
    InvalidLocation {
        bucket: String,
        key: String,
        reason: String,
    },

    /// Backend could not be reached or answered with a retryable failure
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    /// Operation did not finish within its deadline
    #[error("Storage operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether repeating the same operation may succeed.
    ///
    /// Missing objects and malformed locations are permanent; backend and IO
    /// hiccups are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::NotFound { .. } | StorageError::InvalidLocation { .. } => false,
            StorageError::Unavailable(_) | StorageError::Timeout { .. } => true,
            StorageError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
        }
    }
}
