//! Package verdict aggregation.
//!
//! Reduction rule: any error makes the package `error`; otherwise any failing
//! file makes it `fail`; otherwise it passes. A package with no checked files
//! is `error`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::conformance::{ConformanceReport, FileCheck};
use crate::error::{ErrorKind, ValidationError};
use crate::report::Outcome;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Error => "error",
        }
    }

    /// Outcome label used by downstream consumers: `SUCCESS` or `FAILURE`.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            Verdict::Pass => "SUCCESS",
            Verdict::Fail | Verdict::Error => "FAILURE",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault that stopped the pipeline or a single file check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Vec<String>,
}

impl From<&ValidationError> for StageError {
    fn from(err: &ValidationError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileError {
    pub file: String,
    pub error: StageError,
}

/// Failing rule names for one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileFailures {
    pub file: String,
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageVerdict {
    pub verdict: Verdict,
    pub reports: Vec<ConformanceReport>,
    pub file_errors: Vec<FileError>,
    /// Set when a stage outside the per-file checks failed.
    pub stage_error: Option<StageError>,
    pub message: String,
}

impl PackageVerdict {
    /// Verdict for a run that stopped before or outside conformance checking.
    pub fn from_stage_error(err: &ValidationError) -> Self {
        Self {
            verdict: Verdict::Error,
            reports: Vec::new(),
            file_errors: Vec::new(),
            stage_error: Some(StageError::from(err)),
            message: err.to_string(),
        }
    }

    /// Reduce per-file results into a package verdict.
    pub fn aggregate(checks: Vec<FileCheck>) -> Self {
        if checks.is_empty() {
            return Self {
                verdict: Verdict::Error,
                reports: Vec::new(),
                file_errors: Vec::new(),
                stage_error: Some(StageError {
                    kind: ErrorKind::AssetValidationError,
                    message: "package has no payload files".to_string(),
                    details: Vec::new(),
                }),
                message: "package has no payload files".to_string(),
            };
        }

        let total = checks.len();
        let mut reports = Vec::new();
        let mut file_errors = Vec::new();
        for check in checks {
            match check.result {
                Ok(report) => reports.push(report),
                Err(err) => file_errors.push(FileError {
                    file: check.file.path.to_string_lossy().into_owned(),
                    error: StageError::from(&err),
                }),
            }
        }

        let failed = reports
            .iter()
            .filter(|r| r.outcome == Outcome::Fail)
            .count();

        let (verdict, message) = if !file_errors.is_empty() {
            (
                Verdict::Error,
                format!(
                    "{} of {} file(s) could not be checked: {}",
                    file_errors.len(),
                    total,
                    file_errors
                        .iter()
                        .map(|e| e.error.message.as_str())
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
            )
        } else if failed > 0 {
            (
                Verdict::Fail,
                format!("{failed} of {total} file(s) failed format policy checks"),
            )
        } else {
            (
                Verdict::Pass,
                format!("all {total} file(s) conform to their format policies"),
            )
        };

        Self {
            verdict,
            reports,
            file_errors,
            stage_error: None,
            message,
        }
    }

    /// Escalate to `error` after a later stage failed, keeping the reports.
    pub fn into_error(mut self, err: &ValidationError) -> Self {
        self.verdict = Verdict::Error;
        self.message = err.to_string();
        self.stage_error = Some(StageError::from(err));
        self
    }

    /// Kind of the first error recorded, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.stage_error
            .as_ref()
            .map(|e| e.kind)
            .or_else(|| self.file_errors.first().map(|e| e.error.kind))
    }

    /// Detail lines for every recorded error.
    pub fn error_details(&self) -> Vec<String> {
        let mut details = Vec::new();
        if let Some(stage) = &self.stage_error {
            if stage.details.is_empty() {
                details.push(stage.message.clone());
            } else {
                details.extend(stage.details.iter().cloned());
            }
        }
        details.extend(
            self.file_errors
                .iter()
                .map(|e| format!("{}: {}", e.file, e.error.message)),
        );
        details
    }

    /// Failing rule names per failing file, in payload order.
    pub fn failures(&self) -> Vec<FileFailures> {
        self.reports
            .iter()
            .filter(|r| r.outcome == Outcome::Fail)
            .map(|r| FileFailures {
                file: r.file.to_string_lossy().into_owned(),
                rules: r.failures.iter().map(|f| f.rule.clone()).collect(),
            })
            .collect()
    }
}
