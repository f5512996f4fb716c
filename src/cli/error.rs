//! CLI error types and conversions

use crate::credentials::CredentialError;
use crate::ledger::LedgerError;
use crate::orchestrator::OrchestratorError;
use crate::source::SourceError;
use crate::store::StoreError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Credential error
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Source error
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Storage error
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Ledger error
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Orchestrator error
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
