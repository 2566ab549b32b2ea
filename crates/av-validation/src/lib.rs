//! av-validation: validation pipeline for digitized audiovisual BagIt packages
//!
//! A package arrives as a tar archive in a media-type-specific source bucket.
//! The pipeline fetches and unpacks it, verifies bag integrity and payload
//! layout, resolves a format policy for every payload file, runs the
//! conformance tool against each file and reduces the reports to a single
//! pass / fail / error verdict. It then moves, quarantines or leaves the
//! package and publishes one notification.
//!
//! ## Layer 1 - Pipeline
//!
//! ## Key Components
//!
//! - `ValidationPipeline`: infallible entry point for one package
//! - `MediaConchRunner`: `ConformanceChecker` backed by the MediaConch CLI
//! - `PackageVerdict`: error > fail > pass reduction over per-file reports
//! - `DispositionDispatcher`: copy-then-delete relocation plus notification

pub mod aggregate;
pub mod bag;
pub mod config;
pub mod conformance;
pub mod disposition;
mod error;
pub mod fakes;
pub mod fetch;
pub mod notify;
pub mod obs;
pub mod package;
pub mod pipeline;
pub mod policy;
pub mod report;
pub mod retry;
pub mod structure;
pub mod telemetry;

pub use aggregate::{FileFailures, PackageVerdict, Verdict};
pub use bag::{verify_bag, BagProblem, BagReport, DigestAlgorithm};
pub use config::{ConfigError, ToolConfig, ValidatorConfig, SERVICE_NAME};
pub use conformance::{
    check_all, ConformanceChecker, ConformanceReport, FileCheck, MediaConchRunner,
};
pub use disposition::{Disposition, DispositionDispatcher, DispositionState};
pub use error::{ErrorKind, FetchError, ValidationError};
pub use fetch::PackageFetcher;
pub use notify::{LogNotifier, Notification, Notifier, NotifyError, WebhookNotifier};
pub use package::{FileFormat, FileRole, MediaType, Package, PayloadFile, RefId};
pub use pipeline::{PipelineOutcome, ValidationPipeline, ValidationRequest};
pub use policy::{policy_for, PolicyId, PolicyResolver};
pub use report::{
    parse_report, Outcome, PolicyKind, PolicyNode, ReportNode, RuleFailure, RuleResult,
};
pub use retry::RetryPolicy;
pub use telemetry::init_tracing;
