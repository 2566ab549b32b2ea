//! Error taxonomy for the validation pipeline.
//!
//! Every variant of [`ValidationError`] maps to the `error` verdict: the
//! pipeline could not determine conformance. A policy-driven `fail` is not an
//! error and never travels through this type.

use std::fmt;
use std::path::PathBuf;

use av_storage::{ObjectLocation, StorageError};
use serde::{Deserialize, Serialize};

use crate::bag::BagProblem;

/// Problems retrieving or unpacking a package.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("source object not found: {0}")]
    ObjectNotFound(ObjectLocation),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("archive is corrupt or unreadable: {0}")]
    CorruptArchive(String),

    #[error("unsafe archive entry rejected: {0}")]
    UnsafeEntry(String),

    #[error("bag root {} missing after extraction", .0.display())]
    BagRootMissing(PathBuf),

    #[error("scratch io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable names for error categories, used in notifications and logs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FetchError,
    BagIntegrityError,
    UnsupportedFormatError,
    ToolInvocationError,
    ReportParseError,
    RefIdError,
    AssetValidationError,
    DispositionError,
    AlreadyExistsError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FetchError => "FetchError",
            ErrorKind::BagIntegrityError => "BagIntegrityError",
            ErrorKind::UnsupportedFormatError => "UnsupportedFormatError",
            ErrorKind::ToolInvocationError => "ToolInvocationError",
            ErrorKind::ReportParseError => "ReportParseError",
            ErrorKind::RefIdError => "RefIdError",
            ErrorKind::AssetValidationError => "AssetValidationError",
            ErrorKind::DispositionError => "DispositionError",
            ErrorKind::AlreadyExistsError => "AlreadyExistsError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecoverable faults raised by pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{refid:?} is not a valid refid (expected 32 alphanumeric characters)")]
    RefId { refid: String },

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("bag integrity check failed with {} problem(s)", .problems.len())]
    BagIntegrity { problems: Vec<BagProblem> },

    #[error(
        "delivered files do not match what is expected (expected: {}; actual: {})",
        .expected.join(", "),
        .actual.join(", ")
    )]
    AssetStructure {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("no format policy for {file}: {reason}")]
    UnsupportedFormat { file: String, reason: String },

    #[error("conformance tool unusable for {file}: {reason}")]
    ToolInvocation { file: String, reason: String },

    #[error("malformed conformance report for {file}: {reason}")]
    ReportParse { file: String, reason: String },

    #[error("could not relocate package: {0}")]
    Disposition(StorageError),

    #[error("a package with refid {refid} is already waiting to be QCed at {existing}")]
    AlreadyExists {
        refid: String,
        existing: ObjectLocation,
    },
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::RefId { .. } => ErrorKind::RefIdError,
            ValidationError::Fetch(_) => ErrorKind::FetchError,
            ValidationError::BagIntegrity { .. } => ErrorKind::BagIntegrityError,
            ValidationError::AssetStructure { .. } => ErrorKind::AssetValidationError,
            ValidationError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormatError,
            ValidationError::ToolInvocation { .. } => ErrorKind::ToolInvocationError,
            ValidationError::ReportParse { .. } => ErrorKind::ReportParseError,
            ValidationError::Disposition(_) => ErrorKind::DispositionError,
            ValidationError::AlreadyExists { .. } => ErrorKind::AlreadyExistsError,
        }
    }

    /// Human-readable detail lines, one per underlying problem.
    pub fn details(&self) -> Vec<String> {
        match self {
            ValidationError::BagIntegrity { problems } => {
                problems.iter().map(|p| p.to_string()).collect()
            }
            other => vec![other.to_string()],
        }
    }
}
