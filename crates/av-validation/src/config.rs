//! Validator configuration.
//!
//! The pipeline never reads the process environment; the binary builds a
//! [`ValidatorConfig`] and threads it through explicitly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Service name carried on every notification.
pub const SERVICE_NAME: &str = "digitized_av_validation";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unknown media type {0:?} (expected audio or video)")]
    UnknownMediaType(String),
}

/// How to invoke the external conformance tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolConfig {
    /// Executable name or path.
    pub program: String,
    /// Extra arguments placed before the policy and file arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-invocation timeout; 0 disables it.
    pub timeout_secs: u64,
    /// Upper bound on concurrent invocations for one package.
    pub max_concurrency: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "mediaconch".to_string(),
            args: Vec::new(),
            timeout_secs: 300,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Deployment environment name (`dev`, `prod`, ...).
    pub environment: String,
    pub source_bucket: String,
    pub destination_bucket: String,
    /// Failed packages are moved here when set; otherwise left in place.
    #[serde(default)]
    pub quarantine_bucket: Option<String>,
    /// Root under which each run creates its private scratch directory.
    pub scratch_dir: PathBuf,
    pub policy_dir: PathBuf,
    /// Notification topic or webhook identifier.
    pub notification_channel: String,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ValidatorConfig {
    /// Config with defaults for everything but the buckets and directories.
    pub fn new(
        source_bucket: impl Into<String>,
        destination_bucket: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
        policy_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            environment: "dev".to_string(),
            source_bucket: source_bucket.into(),
            destination_bucket: destination_bucket.into(),
            quarantine_bucket: None,
            scratch_dir: scratch_dir.into(),
            policy_dir: policy_dir.into(),
            notification_channel: String::new(),
            tool: ToolConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_bucket.trim().is_empty() {
            return Err(ConfigError::Missing("source_bucket"));
        }
        if self.destination_bucket.trim().is_empty() {
            return Err(ConfigError::Missing("destination_bucket"));
        }
        if let Some(q) = &self.quarantine_bucket {
            if q.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "quarantine_bucket",
                    reason: "must not be empty when set".to_string(),
                });
            }
            if q == &self.source_bucket {
                return Err(ConfigError::Invalid {
                    field: "quarantine_bucket",
                    reason: "must differ from the source bucket".to_string(),
                });
            }
        }
        if self.destination_bucket == self.source_bucket {
            return Err(ConfigError::Invalid {
                field: "destination_bucket",
                reason: "must differ from the source bucket".to_string(),
            });
        }
        if self.scratch_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("scratch_dir"));
        }
        if self.tool.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "tool.program",
                reason: "must not be empty".to_string(),
            });
        }
        if self.tool.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "tool.max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
