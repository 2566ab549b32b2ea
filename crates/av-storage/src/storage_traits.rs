//! Storage trait definitions
//!
//! `ObjectStore` is the only storage abstraction the validation pipeline
//! consumes: get / put / delete / exists keyed by a bucket and an object key,
//! plus the streaming pair the pipeline uses for package archives:
//! `get_to_path` downloads into a local file and `copy` relocates an object
//! without routing its bytes through the caller.
//! Buckets stand in for the media-type-specific source prefix, the
//! destination area and the optional quarantine area.
//!
//! All operations are async and backend-agnostic. In-memory fakes are
//! provided for testing via the `fakes` module.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A single object address: bucket plus key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Final path segment of the key (the object's file name).
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Reject keys that could escape a bucket when mapped onto a filesystem.
    pub fn validate(&self) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidLocation {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            reason: reason.to_string(),
        };

        if self.bucket.is_empty() || self.bucket.contains('/') || self.bucket == ".." {
            return Err(invalid("bucket must be a single non-empty segment"));
        }
        if self.key.is_empty() || self.key.starts_with('/') {
            return Err(invalid("key must be a non-empty relative path"));
        }
        if self
            .key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(invalid("key contains an empty or relative segment"));
        }
        Ok(())
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Object storage.
///
/// Guarantees:
/// - `put` overwrites; repeating a put with the same bytes is a no-op in effect.
/// - `get` returns the exact bytes last stored, or `StorageError::NotFound`.
/// - `delete` of an absent object succeeds, so it is safe to retry.
/// - `get_to_path` and `copy` never leave a partial object or file behind
///   under the final name.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Retrieve an object's bytes.
    async fn get(&self, location: &ObjectLocation) -> StorageResult<Vec<u8>>;

    /// Store bytes at a location, replacing any existing object.
    async fn put(&self, location: &ObjectLocation, data: &[u8]) -> StorageResult<()>;

    /// Remove an object. No-op if absent.
    async fn delete(&self, location: &ObjectLocation) -> StorageResult<()>;

    /// Check whether an object exists.
    async fn exists(&self, location: &ObjectLocation) -> StorageResult<bool>;

    /// Size of an object in bytes, or `StorageError::NotFound`.
    async fn size(&self, location: &ObjectLocation) -> StorageResult<u64>;

    /// Stream an object into the local file `path`, replacing it.
    /// Returns the number of bytes written.
    async fn get_to_path(&self, location: &ObjectLocation, path: &Path) -> StorageResult<u64>;

    /// Copy an object to `to`, replacing any existing object there.
    async fn copy(&self, from: &ObjectLocation, to: &ObjectLocation) -> StorageResult<()>;
}
