//! Conformance checking of payload files against their format policies.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ToolConfig;
use crate::error::ValidationError;
use crate::package::PayloadFile;
use crate::policy::{PolicyId, PolicyResolver};
use crate::report::{parse_report, Outcome, ReportNode, RuleFailure};

/// Parsed result of checking one file.
#[derive(Debug, Clone, Serialize)]
pub struct ConformanceReport {
    /// Path relative to the package root.
    pub file: PathBuf,
    pub policy: PolicyId,
    pub outcome: Outcome,
    pub tree: ReportNode,
    pub failures: Vec<RuleFailure>,
    #[serde(skip)]
    pub raw: String,
    pub exit_code: Option<i32>,
}

impl ConformanceReport {
    /// Parse and evaluate a raw XML report for `file`.
    pub fn from_xml(
        file: &PayloadFile,
        raw: String,
        exit_code: Option<i32>,
    ) -> Result<Self, ValidationError> {
        let tree = parse_report(&raw).map_err(|e| ValidationError::ReportParse {
            file: file.path.to_string_lossy().into_owned(),
            reason: e.to_string(),
        })?;

        for mismatch in tree.reported_mismatches() {
            warn!(
                file = %file.path.display(),
                policy = %mismatch.policy,
                reported = mismatch.reported.as_str(),
                computed = mismatch.computed.as_str(),
                "reported policy outcome disagrees with computed outcome"
            );
        }

        let outcome = tree.evaluate();
        let failures = tree.failures();
        Ok(Self {
            file: file.path.clone(),
            policy: file.policy.clone(),
            outcome,
            tree,
            failures,
            raw,
            exit_code,
        })
    }
}

/// Checks a single payload file against its policy.
#[async_trait]
pub trait ConformanceChecker: Send + Sync {
    /// `path` is the file's absolute location on disk.
    async fn check(&self, file: &PayloadFile, path: &Path)
        -> Result<ConformanceReport, ValidationError>;
}

/// Runs the MediaConch CLI as a subprocess.
pub struct MediaConchRunner {
    tool: ToolConfig,
    resolver: PolicyResolver,
}

impl MediaConchRunner {
    pub fn new(tool: ToolConfig, resolver: PolicyResolver) -> Self {
        Self { tool, resolver }
    }

    fn invocation_error(file: &PayloadFile, reason: String) -> ValidationError {
        ValidationError::ToolInvocation {
            file: file.path.to_string_lossy().into_owned(),
            reason,
        }
    }
}

#[async_trait]
impl ConformanceChecker for MediaConchRunner {
    async fn check(
        &self,
        file: &PayloadFile,
        path: &Path,
    ) -> Result<ConformanceReport, ValidationError> {
        let start = Instant::now();
        let policy_path = self.resolver.policy_path(&file.policy);

        let child = Command::new(&self.tool.program)
            .args(&self.tool.args)
            .arg("-p")
            .arg(&policy_path)
            .arg("-fx")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Self::invocation_error(file, format!("failed to start {}: {e}", self.tool.program))
            })?;

        let waited = if self.tool.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.tool.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                Self::invocation_error(
                    file,
                    format!("timed out after {} seconds", self.tool.timeout_secs),
                )
            })?
        } else {
            child.wait_with_output().await
        };
        let output = waited
            .map_err(|e| Self::invocation_error(file, format!("failed to collect output: {e}")))?;

        let exit_code = output.status.code();
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        debug!(
            file = %file.path.display(),
            policy = %file.policy,
            exit_code = ?exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "conformance tool finished"
        );

        if stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::invocation_error(
                file,
                format!(
                    "exit code {} with empty report{}",
                    exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                    if stderr.trim().is_empty() {
                        String::new()
                    } else {
                        format!(": {}", stderr.trim())
                    }
                ),
            ));
        }

        ConformanceReport::from_xml(file, stdout, exit_code)
    }
}

/// One result slot per payload file.
#[derive(Debug)]
pub struct FileCheck {
    pub file: PayloadFile,
    pub result: Result<ConformanceReport, ValidationError>,
}

/// Check every file with at most `max_concurrency` checks in flight.
///
/// Results come back in the order of `files`.
pub async fn check_all(
    checker: &dyn ConformanceChecker,
    root: &Path,
    files: &[PayloadFile],
    max_concurrency: usize,
) -> Vec<FileCheck> {
    stream::iter(files.iter().cloned())
        .map(|file| async move {
            let path = root.join(&file.path);
            let result = checker.check(&file, &path).await;
            FileCheck { file, result }
        })
        .buffered(max_concurrency.max(1))
        .collect()
        .await
}
