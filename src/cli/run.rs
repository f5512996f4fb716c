//! Run command implementation

use crate::credentials::{load_keys_file, CredentialPool, UsageSnapshot};
use crate::ledger::ProgressLedger;
use crate::orchestrator::{BatchOptions, BatchOrchestrator};
use crate::processor::HttpProcessor;
use crate::resume::CheckpointStore;
use crate::shutdown::SharedShutdown;
use crate::source::{EpisodeSource, ManifestSource};
use crate::store::FileKvStore;
use crate::ItemState;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

use super::{CliError, StatusArgs};

/// Maximum allowed concurrency; above this, workers mostly contend for the
/// same credentials anyway.
const MAX_CONCURRENCY: usize = 32;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output for scripting
    Json,
}

/// Podcast Batch Processor CLI
#[derive(Parser, Debug)]
#[command(name = "podcast-batch-processor")]
#[command(about = "Batch-process podcast episodes through a transcription API", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (human or json)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Directory holding checkpoints, the progress ledger, and credential
    /// usage state
    #[arg(long, global = true, default_value = ".batch-state")]
    pub state_dir: PathBuf,

    /// Path to the JSON keys file
    #[arg(long, global = true, default_value = "keys.json")]
    pub keys: PathBuf,

    /// Number of concurrent workers (default: 4, max: 32)
    ///
    /// More workers only help while credentials have quota headroom; the
    /// pool coordinates all workers to stay within per-key limits.
    #[arg(long, global = true, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Processing attempts per episode before it is marked failed
    #[arg(long, global = true, default_value = "3", value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: u32,

    /// Expose Prometheus metrics on this address (e.g. 0.0.0.0:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a batch of episodes through the processing service
    Run(RunArgs),
    /// Show batch progress and per-credential health
    Status(StatusArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the episode manifest (JSON)
    pub manifest: PathBuf,

    /// Processing service endpoint URL
    #[arg(long)]
    pub endpoint: String,

    /// Batch identifier; reusing an id resumes that batch
    /// (default: manifest file stem)
    #[arg(long)]
    pub batch_id: Option<String>,

    /// Ledger namespace (default: the manifest's feed name)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Process the named item even if the ledger already records it
    /// (repeatable)
    #[arg(long = "force-item")]
    pub force_items: Vec<String>,

    /// Reset previously failed items back to pending before dispatch
    #[arg(long, default_value_t = false)]
    pub retry_failed: bool,
}

impl RunArgs {
    /// Execute the run command.
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let specs = load_keys_file(&cli.keys)?;
        info!(keys = specs.len(), "loaded credentials");
        let pool = Arc::new(CredentialPool::from_specs(specs)?);

        let kv = Arc::new(FileKvStore::new(cli.state_dir.join("kv"))?);
        if let Some(snapshot) = UsageSnapshot::load_from(kv.as_ref()) {
            pool.restore_usage(&snapshot);
            info!("restored credential usage from previous run");
        }

        let source = ManifestSource::load(&self.manifest)?;
        let namespace = self
            .namespace
            .clone()
            .unwrap_or_else(|| source.feed_name().to_string());
        let batch_id = match &self.batch_id {
            Some(id) => id.clone(),
            None => self
                .manifest
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .ok_or_else(|| {
                    CliError::InvalidArgument(format!(
                        "cannot derive batch id from {}",
                        self.manifest.display()
                    ))
                })?,
        };

        let options = BatchOptions::new(&batch_id, &namespace)
            .with_concurrency(cli.concurrency)
            .with_max_attempts(cli.max_attempts)
            .with_force_items(self.force_items.iter().cloned())
            .with_retry_failed(self.retry_failed);

        let mut orchestrator = BatchOrchestrator::new(
            pool,
            ProgressLedger::new(kv.clone()),
            CheckpointStore::new(cli.state_dir.join("checkpoints")),
            options,
        )
        .with_shutdown(shutdown)
        .with_usage_store(kv);

        let bar = match cli.output_format {
            OutputFormat::Human => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{spinner} {msg}")
                        .expect("progress template is valid"),
                );
                let settled = Arc::new(AtomicUsize::new(0));
                let observer_bar = bar.clone();
                orchestrator = orchestrator.with_observer(Arc::new(move |_id, state| {
                    if matches!(state, ItemState::Succeeded | ItemState::Failed) {
                        let n = settled.fetch_add(1, Ordering::SeqCst) + 1;
                        observer_bar.set_message(format!("settled {n} episodes"));
                        observer_bar.tick();
                    }
                }));
                Some(bar)
            }
            OutputFormat::Json => None,
        };

        let processor = HttpProcessor::new(&self.endpoint);
        let summary = orchestrator.run(&source, &processor).await?;

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }

        match cli.output_format {
            OutputFormat::Human => {
                println!("Batch {} finished", summary.batch_id);
                println!(
                    "  {} succeeded, {} failed, {} skipped, {} pending",
                    summary.succeeded, summary.failed, summary.skipped, summary.pending
                );
                println!("  elapsed: {:.1}s", summary.elapsed_secs);
                if summary.cancelled {
                    println!("  run was cancelled; re-run with the same --batch-id to resume");
                }
                if summary.resource_exhausted {
                    println!("  run halted: no credential had quota available");
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summary)
                        .map_err(|e| CliError::InvalidArgument(e.to_string()))?
                );
            }
        }

        Ok(())
    }
}
