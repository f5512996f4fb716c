//! Status command implementation

use crate::credentials::{load_keys_file, CredentialPool, UsageSnapshot};
use crate::ledger::ProgressLedger;
use crate::resume::CheckpointStore;
use crate::store::FileKvStore;
use clap::Parser;
use std::sync::Arc;

use super::run::{Cli, OutputFormat};
use super::CliError;

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Batch identifier to inspect
    #[arg(long)]
    pub batch_id: String,

    /// Ledger namespace to count completed items in
    #[arg(long)]
    pub namespace: Option<String>,
}

impl StatusArgs {
    /// Execute the status command.
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let checkpoints = CheckpointStore::new(cli.state_dir.join("checkpoints"));
        let checkpoint = checkpoints.load(&self.batch_id);

        let kv = Arc::new(FileKvStore::new(cli.state_dir.join("kv"))?);

        // Credential health is reconstructed from the persisted usage
        // snapshot; breakers and day windows survive restarts.
        let specs = load_keys_file(&cli.keys)?;
        let pool = Arc::new(CredentialPool::from_specs(specs)?);
        if let Some(snapshot) = UsageSnapshot::load_from(kv.as_ref()) {
            pool.restore_usage(&snapshot);
        }
        let credentials = pool.status();

        let ledger_count = match &self.namespace {
            Some(namespace) => Some(ProgressLedger::new(kv.clone()).count(namespace)?),
            None => None,
        };

        match cli.output_format {
            OutputFormat::Human => {
                match &checkpoint {
                    Some(checkpoint) => {
                        let counts = checkpoint.counts();
                        println!("Batch {}", self.batch_id);
                        println!(
                            "  {} items: {} succeeded, {} failed, {} pending, {} running",
                            counts.total(),
                            counts.succeeded,
                            counts.failed,
                            counts.pending,
                            counts.running
                        );
                    }
                    None => println!("Batch {}: no checkpoint found", self.batch_id),
                }

                if let Some(count) = ledger_count {
                    println!(
                        "  ledger: {count} items completed in namespace '{}'",
                        self.namespace.as_deref().unwrap_or_default()
                    );
                }

                println!("Credentials:");
                for cred in &credentials {
                    println!(
                        "  {}: {}/{} per-minute, {}/{} per-day, breaker {}",
                        cred.key_id,
                        cred.minute_remaining,
                        cred.minute_limit,
                        cred.day_remaining,
                        cred.day_limit,
                        cred.breaker_state
                    );
                }
            }
            OutputFormat::Json => {
                let counts = checkpoint.as_ref().map(|c| c.counts());
                let output = serde_json::json!({
                    "batch_id": self.batch_id,
                    "checkpoint": counts,
                    "ledger_completed": ledger_count,
                    "credentials": credentials,
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&output)
                        .map_err(|e| CliError::InvalidArgument(e.to_string()))?
                );
            }
        }

        Ok(())
    }
}
