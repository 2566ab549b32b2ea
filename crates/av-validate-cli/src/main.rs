//! Digitized AV validation CLI
//!
//! The `av-validate` command validates digitized audiovisual BagIt packages
//! before they enter the preservation workflow.
//!
//! ## Commands
//!
//! - `run`: Validate one package from object storage and dispatch it
//! - `verify-bag`: Check the integrity of a local bag
//! - `check-file`: Run the conformance tool against a single payload file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

use av_storage::{FsObjectStore, ObjectStore};
use av_validation::{
    verify_bag, ConformanceChecker, LogNotifier, MediaConchRunner, MediaType, Notifier,
    PolicyResolver, ToolConfig, ValidationPipeline, ValidationRequest, ValidatorConfig, Verdict,
    WebhookNotifier,
};

#[derive(Parser)]
#[command(name = "av-validate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validate digitized AV packages against format policies", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one package from the source bucket and dispatch it
    Run(RunArgs),

    /// Verify the integrity of a local bag directory
    VerifyBag {
        /// Bag root (the directory holding bagit.txt)
        path: PathBuf,
    },

    /// Resolve the policy for one file and run the conformance tool on it
    CheckFile {
        /// Media type the file belongs to
        #[arg(long)]
        media: MediaType,

        /// Directory holding the policy XML files
        #[arg(long, env = "POLICY_DIR")]
        policy_dir: PathBuf,

        /// Conformance tool executable
        #[arg(long, env = "MEDIACONCH_PATH", default_value = "mediaconch")]
        mediaconch: String,

        /// Tool timeout in seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,

        /// Payload file to check
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Deployment environment name
    #[arg(long, env = "ENV", default_value = "dev")]
    environment: String,

    /// Media type of the package
    #[arg(long, env = "FORMAT")]
    format: MediaType,

    /// Bucket the package archive was uploaded to
    #[arg(long, env = "AWS_SOURCE_BUCKET")]
    source_bucket: String,

    /// Bucket that receives valid packages
    #[arg(long, env = "DESTINATION_BUCKET")]
    destination_bucket: String,

    /// Bucket that receives failed packages (left in place when unset)
    #[arg(long, env = "QUARANTINE_BUCKET")]
    quarantine_bucket: Option<String>,

    /// Object key of the package archive
    #[arg(long, env = "SOURCE_FILENAME")]
    source_key: String,

    /// Scratch directory for unpacked packages
    #[arg(long, env = "TMP_DIR", default_value = "/tmp")]
    scratch_dir: PathBuf,

    /// Directory holding the policy XML files
    #[arg(long, env = "POLICY_DIR")]
    policy_dir: PathBuf,

    /// Notification channel: an http(s) webhook URL, or `log:<name>` to only
    /// write notifications to the log
    #[arg(long, env = "AWS_SNS_TOPIC")]
    notification_channel: String,

    /// Root directory of the filesystem object store
    #[arg(long, env = "STORE_ROOT")]
    store_root: PathBuf,

    /// Conformance tool executable
    #[arg(long, env = "MEDIACONCH_PATH", default_value = "mediaconch")]
    mediaconch: String,

    /// Tool timeout in seconds
    #[arg(long, default_value = "300")]
    timeout_secs: u64,

    /// Maximum files checked concurrently
    #[arg(long, default_value = "4")]
    max_concurrency: usize,

    /// Retries for storage and notification calls
    #[arg(long, default_value = "3")]
    retries: u32,
}

impl RunArgs {
    fn into_config(self) -> ValidatorConfig {
        let mut config = ValidatorConfig::new(
            self.source_bucket,
            self.destination_bucket,
            self.scratch_dir,
            self.policy_dir,
        );
        config.environment = self.environment;
        config.quarantine_bucket = self.quarantine_bucket.filter(|b| !b.is_empty());
        config.notification_channel = self.notification_channel;
        config.tool = ToolConfig {
            program: self.mediaconch,
            args: Vec::new(),
            timeout_secs: self.timeout_secs,
            max_concurrency: self.max_concurrency,
        };
        config.retry.max_retries = self.retries;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    av_validation::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::VerifyBag { path } => cmd_verify_bag(&path).await,
        Commands::CheckFile {
            media,
            policy_dir,
            mediaconch,
            timeout_secs,
            file,
        } => cmd_check_file(media, &policy_dir, mediaconch, timeout_secs, &file).await,
    }
}

/// Validate one package end to end
async fn cmd_run(args: RunArgs) -> Result<()> {
    let media_type = args.format;
    let source_key = args.source_key.clone();
    let store_root = args.store_root.clone();
    let config = args.into_config();
    config.validate().context("Invalid validator configuration")?;

    let store: Arc<dyn ObjectStore> = Arc::new(
        FsObjectStore::new(&store_root)
            .with_context(|| format!("Failed to open object store at {:?}", store_root))?,
    );
    let checker: Arc<dyn ConformanceChecker> = Arc::new(MediaConchRunner::new(
        config.tool.clone(),
        PolicyResolver::new(&config.policy_dir),
    ));
    let notifier = notifier_for(&config.notification_channel)?;

    let pipeline = ValidationPipeline::new(config, store, checker, notifier)
        .context("Failed to build validation pipeline")?;

    info!(source_key = %source_key, media_type = %media_type, "validating package");
    let outcome = pipeline
        .run(&ValidationRequest {
            media_type,
            source_key,
        })
        .await;

    let rendered =
        serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?;
    println!("{}", rendered);

    match outcome.verdict() {
        Verdict::Pass => Ok(()),
        verdict => anyhow::bail!("Package {} finished with verdict {}", outcome.refid, verdict),
    }
}

/// Prefix that opts into log-only notification delivery.
const LOG_CHANNEL_PREFIX: &str = "log:";

/// Build the notifier for a channel.
///
/// Anything that is neither a webhook URL nor an explicit `log:` channel is
/// rejected, so a run never reports a delivery that did not leave the process.
fn notifier_for(channel: &str) -> Result<Arc<dyn Notifier>> {
    let channel = channel.trim();
    if channel.starts_with("http://") || channel.starts_with("https://") {
        let webhook = WebhookNotifier::new(channel, Duration::from_secs(10))
            .context("Failed to build webhook notifier")?;
        return Ok(Arc::new(webhook));
    }
    if let Some(name) = channel.strip_prefix(LOG_CHANNEL_PREFIX) {
        if name.is_empty() {
            anyhow::bail!("Log notification channel needs a name, e.g. log:validation");
        }
        return Ok(Arc::new(LogNotifier::new(name)));
    }
    if channel.starts_with("arn:") {
        anyhow::bail!(
            "Notification channel {:?} looks like an SNS topic, which this build cannot publish to; \
             use an http(s) webhook or {}<name>",
            channel,
            LOG_CHANNEL_PREFIX
        );
    }
    anyhow::bail!(
        "Unsupported notification channel {:?}: expected an http(s) webhook URL or {}<name>",
        channel,
        LOG_CHANNEL_PREFIX
    )
}

/// Verify a local bag
async fn cmd_verify_bag(path: &Path) -> Result<()> {
    let root = path.to_path_buf();
    let report = tokio::task::spawn_blocking(move || verify_bag(&root))
        .await
        .context("Bag verification task failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize bag report")?
    );

    if !report.valid {
        anyhow::bail!(
            "Bag at {:?} is invalid: {} problem(s)",
            path,
            report.problems.len()
        );
    }
    Ok(())
}

/// Check a single file against its policy
async fn cmd_check_file(
    media: MediaType,
    policy_dir: &Path,
    mediaconch: String,
    timeout_secs: u64,
    file: &Path,
) -> Result<()> {
    let resolver = PolicyResolver::new(policy_dir);
    let payload = resolver
        .resolve_file(media, file)
        .with_context(|| format!("No policy applies to {:?}", file))?;

    let runner = MediaConchRunner::new(
        ToolConfig {
            program: mediaconch,
            timeout_secs,
            ..ToolConfig::default()
        },
        resolver,
    );
    let report = runner
        .check(&payload, file)
        .await
        .with_context(|| format!("Conformance check failed for {:?}", file))?;

    println!("File: {}", file.display());
    println!("Policy: {}", payload.policy.as_str());
    println!("Outcome: {}", report.outcome.as_str());

    if report.failures.is_empty() {
        return Ok(());
    }

    println!();
    for failure in &report.failures {
        println!(
            "  ✗ {} (actual: {}, expected: {} {})",
            failure.rule,
            failure.actual.as_deref().unwrap_or("-"),
            failure.operator.as_deref().unwrap_or("="),
            failure.expected.as_deref().unwrap_or("-"),
        );
    }
    anyhow::bail!("{} rule(s) failed", report.failures.len())
}
