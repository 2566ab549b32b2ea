//! Log output for `av-validate`.
//!
//! The binary keeps two streams apart: stdout carries only the command's
//! result (the `PipelineOutcome` or `BagReport` JSON, or the `check-file`
//! listing) so it can be piped into `jq` or captured by an orchestrator,
//! while every tracing event goes to stderr. Pipeline events carry the
//! `av.package` span fields (`refid`, `media_type`), so JSON log lines from
//! concurrent runs can be told apart after shipping.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the stderr subscriber. First call wins.
///
/// `RUST_LOG` overrides `level`. With `json` set, each event is one
/// flattened JSON object holding the event fields next to the current
/// package span.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(
                stderr
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
    } else {
        registry.with(stderr).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed; keeping it");
    }
}
