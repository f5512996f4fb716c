//! Batch orchestration.
//!
//! This module drives a batch of episodes through the external processing
//! service while honoring per-credential limits and surviving restarts.
//!
//! # Overview
//!
//! 1. **Enumeration**: an [`crate::source::EpisodeSource`] produces the work
//!    items for the batch
//! 2. **Resume**: a prior checkpoint for the same batch id overlays its
//!    per-item state onto the enumerated list
//! 3. **Filtering**: the [`crate::ledger::ProgressLedger`] removes items
//!    already completed in any earlier run
//! 4. **Dispatch**: remaining items run on a bounded worker pool; every
//!    external call goes through [`retry::RetryPolicy`] and the
//!    [`crate::credentials::CredentialPool`]
//! 5. **Durability**: every state transition is checkpointed atomically
//!
//! # Failure semantics
//!
//! A single item's permanent failure is recorded and the batch continues.
//! The whole run stops early only on a shutdown request, on credential
//! starvation (no key became eligible within the maximum wait), or when
//! durable state can no longer be written.

pub mod config;
pub mod progress;
pub mod retry;
pub mod runner;

pub use progress::{BatchProgress, ProgressTracker};
pub use retry::{RetryError, RetryPolicy};
pub use runner::{BatchOptions, BatchOrchestrator, BatchSummary, TransitionObserver};

use crate::ledger::LedgerError;
use crate::resume::CheckpointError;
use crate::source::SourceError;
use crate::store::StoreError;

/// Orchestration errors.
///
/// Per-item processing failures are recovered locally and never surface
/// here; these variants cover enumeration problems and the durable-storage
/// failures that are fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Enumeration collaborator failed
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Checkpoint could not be persisted
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Ledger could not be updated
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Key-value storage failed
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}
