//! Structured observability hooks for package lifecycle events.
//!
//! - A package-scoped span that `ValidationPipeline::run` is instrumented with
//! - Emission functions for stage, verdict, disposition and notification events
//!
//! Events are emitted at `info!` level unless noted; filter with `RUST_LOG`.

use tracing::{info, warn};

use crate::aggregate::Verdict;
use crate::disposition::DispositionState;
use crate::error::ErrorKind;

/// Package-scoped span for instrumenting async work.
pub fn package_span(refid: &str, media_type: &str) -> tracing::Span {
    tracing::info_span!("av.package", refid = %refid, media_type = %media_type)
}

pub fn emit_package_started(refid: &str, source: &str) {
    info!(event = "package.started", refid = %refid, source = %source);
}

pub fn emit_stage_started(stage: &str) {
    info!(event = "stage.started", stage = %stage);
}

pub fn emit_stage_finished(stage: &str, duration_ms: u64, success: bool) {
    info!(
        event = "stage.finished",
        stage = %stage,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Stage error (warning level).
pub fn emit_stage_failed(stage: &str, kind: ErrorKind, error: &dyn std::fmt::Display) {
    warn!(event = "stage.failed", stage = %stage, kind = %kind, error = %error);
}

pub fn emit_verdict(refid: &str, verdict: Verdict, failing_files: usize, error_kind: Option<ErrorKind>) {
    info!(
        event = "package.verdict",
        refid = %refid,
        verdict = %verdict,
        failing_files = failing_files,
        error_kind = ?error_kind,
    );
}

pub fn emit_disposition(refid: &str, state: DispositionState, location: Option<&str>) {
    info!(
        event = "package.disposition",
        refid = %refid,
        state = state.as_str(),
        location = location.unwrap_or("-"),
    );
}

pub fn emit_notification(refid: &str, message_id: &str, delivered: bool) {
    if delivered {
        info!(event = "notification.delivered", refid = %refid, message_id = %message_id);
    } else {
        warn!(event = "notification.undelivered", refid = %refid, message_id = %message_id);
    }
}

pub fn emit_package_finished(refid: &str, verdict: Verdict, duration_ms: u64) {
    info!(
        event = "package.finished",
        refid = %refid,
        verdict = %verdict,
        duration_ms = duration_ms,
    );
}
