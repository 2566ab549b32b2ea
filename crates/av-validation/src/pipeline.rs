//! End-to-end validation of one package.
//!
//! Stages run in order and stop at the first fault: refid check, fetch, bag
//! integrity, payload structure, policy resolution, conformance checks. Every
//! path ends in disposition and exactly one notification; [`ValidationPipeline::run`]
//! never returns an error.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use av_storage::{ObjectLocation, ObjectStore};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{warn, Instrument};

use crate::aggregate::{PackageVerdict, Verdict};
use crate::bag::{self, BagProblem};
use crate::config::{ConfigError, ValidatorConfig};
use crate::conformance::{check_all, ConformanceChecker};
use crate::disposition::{Disposition, DispositionDispatcher};
use crate::error::{FetchError, ValidationError};
use crate::fetch::PackageFetcher;
use crate::notify::Notifier;
use crate::obs;
use crate::package::{MediaType, RefId};
use crate::policy::PolicyResolver;
use crate::structure::check_structure;

/// A newly observed source object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub media_type: MediaType,
    /// Object key in the source bucket, e.g. `<refid>.tar.gz`.
    pub source_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    /// Refid as derived from the source key; may be invalid.
    pub refid: String,
    pub media_type: MediaType,
    pub source: ObjectLocation,
    pub disposition: Disposition,
    pub duration_ms: u64,
}

impl PipelineOutcome {
    pub fn verdict(&self) -> Verdict {
        self.disposition.verdict.verdict
    }
}

struct StageClock {
    stage: &'static str,
    start: Instant,
}

impl StageClock {
    fn start(stage: &'static str) -> Self {
        obs::emit_stage_started(stage);
        Self {
            stage,
            start: Instant::now(),
        }
    }

    fn finish<T>(self, result: Result<T, ValidationError>) -> Result<T, ValidationError> {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        obs::emit_stage_finished(self.stage, duration_ms, result.is_ok());
        if let Err(e) = &result {
            obs::emit_stage_failed(self.stage, e.kind(), e);
        }
        result
    }
}

pub struct ValidationPipeline {
    config: ValidatorConfig,
    checker: Arc<dyn ConformanceChecker>,
    fetcher: PackageFetcher,
    resolver: PolicyResolver,
    dispatcher: DispositionDispatcher,
}

impl ValidationPipeline {
    pub fn new(
        config: ValidatorConfig,
        store: Arc<dyn ObjectStore>,
        checker: Arc<dyn ConformanceChecker>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            fetcher: PackageFetcher::new(store.clone(), config.retry.clone()),
            resolver: PolicyResolver::new(config.policy_dir.clone()),
            dispatcher: DispositionDispatcher::new(&config, store, notifier),
            checker,
            config,
        })
    }

    /// Validate, dispose of and report on one package.
    pub async fn run(&self, request: &ValidationRequest) -> PipelineOutcome {
        let refid = RefId::stem_of(&request.source_key).to_string();
        let span = obs::package_span(&refid, request.media_type.as_str());
        self.run_package(request, refid).instrument(span).await
    }

    async fn run_package(&self, request: &ValidationRequest, refid: String) -> PipelineOutcome {
        let start = Instant::now();
        let source = ObjectLocation::new(&self.config.source_bucket, &request.source_key);
        obs::emit_package_started(&refid, &source.to_string());

        // Scratch space lives until disposition is complete.
        let mut scratch = None;
        let verdict = match self
            .validate(&source, request.media_type, &mut scratch)
            .await
        {
            Ok(verdict) => verdict,
            Err(err) => PackageVerdict::from_stage_error(&err),
        };
        obs::emit_verdict(
            &refid,
            verdict.verdict,
            verdict.failures().len(),
            verdict.error_kind(),
        );

        let disposition = self
            .dispatcher
            .dispatch(&refid, request.media_type, &source, verdict)
            .await;
        if let Some(dir) = scratch {
            remove_scratch(dir).await;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_package_finished(&refid, disposition.verdict.verdict, duration_ms);

        PipelineOutcome {
            refid,
            media_type: request.media_type,
            source,
            disposition,
            duration_ms,
        }
    }

    async fn validate(
        &self,
        source: &ObjectLocation,
        media_type: MediaType,
        scratch: &mut Option<TempDir>,
    ) -> Result<PackageVerdict, ValidationError> {
        let refid = RefId::from_source_key(&source.key)?;

        let scratch_path = {
            let dir = create_scratch(&self.config.scratch_dir, &refid)
                .await
                .map_err(FetchError::Io)?;
            let path = dir.path().to_path_buf();
            *scratch = Some(dir);
            path
        };

        let clock = StageClock::start("fetch");
        let package = clock.finish(
            self.fetcher
                .fetch(source, &refid, media_type, &scratch_path)
                .await
                .map_err(ValidationError::from),
        )?;

        let clock = StageClock::start("bag_integrity");
        let root = package.root.clone();
        let integrity = tokio::task::spawn_blocking(move || bag::verify_bag(&root))
            .await
            .map_err(|e| ValidationError::BagIntegrity {
                problems: vec![BagProblem::Unreadable {
                    path: ".".to_string(),
                    reason: e.to_string(),
                }],
            })
            .and_then(|report| {
                if report.valid {
                    Ok(report)
                } else {
                    Err(ValidationError::BagIntegrity {
                        problems: report.problems,
                    })
                }
            });
        clock.finish(integrity)?;

        let clock = StageClock::start("structure");
        clock.finish(check_structure(&package))?;

        let clock = StageClock::start("resolve");
        let files = clock.finish(self.resolver.resolve_package(&package))?;

        let clock = StageClock::start("conformance");
        let checks = check_all(
            self.checker.as_ref(),
            &package.root,
            &files,
            self.config.tool.max_concurrency,
        )
        .await;
        let verdict = PackageVerdict::aggregate(checks);
        clock.finish(Ok(()))?;

        Ok(verdict)
    }
}

/// Per-run scratch directory inside `scratch_root`, removed on drop.
async fn create_scratch(scratch_root: &Path, refid: &RefId) -> std::io::Result<TempDir> {
    let scratch_root = scratch_root.to_path_buf();
    let prefix = format!("{refid}-");
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&scratch_root)?;
        tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&scratch_root)
    })
    .await
    .map_err(std::io::Error::other)?
}

async fn remove_scratch(dir: TempDir) {
    let path = dir.path().to_path_buf();
    let removed = tokio::task::spawn_blocking(move || dir.close())
        .await
        .map_err(std::io::Error::other)
        .and_then(|r| r);
    if let Err(e) = removed {
        warn!(path = %path.display(), error = %e, "scratch directory not removed");
    }
}
