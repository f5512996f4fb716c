//! # Podcast Batch Processor Library
//!
//! A resilient orchestration layer for batch-processing podcast episodes
//! through an external transcription/extraction API. Designed for multi-hour
//! backfills that must respect per-key rate limits and survive restarts.
//!
//! ## Features
//!
//! - **Credential Pooling**: Rotates across multiple API keys, each with its
//!   own per-minute and per-day quota tracking
//! - **Circuit Breaking**: Per-credential failure isolation so one exhausted
//!   or faulty key never blocks the others
//! - **Crash-Safe Resume**: Atomic checkpointing allows an interrupted batch
//!   to restart without repeating completed work
//! - **Duplicate Prevention**: A durable progress ledger filters out episodes
//!   that already succeeded in any previous run
//! - **Bounded Retries**: One consolidated retry policy with exponential
//!   backoff wraps every external call
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use podcast_batch_processor::credentials::{ApiCredential, CredentialPool};
//! use podcast_batch_processor::ledger::ProgressLedger;
//! use podcast_batch_processor::orchestrator::{BatchOptions, BatchOrchestrator};
//! use podcast_batch_processor::processor::HttpProcessor;
//! use podcast_batch_processor::resume::CheckpointStore;
//! use podcast_batch_processor::source::ManifestSource;
//! use podcast_batch_processor::store::FileKvStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kv = Arc::new(FileKvStore::new("./state/kv")?);
//! let pool = Arc::new(CredentialPool::new(vec![
//!     (ApiCredential::new("key-a", "secret-a"), 10, 500),
//! ])?);
//!
//! let orchestrator = BatchOrchestrator::new(
//!     pool,
//!     ProgressLedger::new(kv.clone()),
//!     CheckpointStore::new("./state/checkpoints"),
//!     BatchOptions::new("backfill-2024", "my-feed"),
//! );
//!
//! let source = ManifestSource::new("./episodes.json");
//! let processor = HttpProcessor::new("https://api.example.com/v1/transcribe");
//! let summary = orchestrator.run(&source, &processor).await?;
//! println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several core modules:
//!
//! - [`credentials`] - API key pool with quota tracking and circuit breakers
//! - [`orchestrator`] - Batch driver, worker pool, and retry policy
//! - [`ledger`] - Durable record of permanently completed episodes
//! - [`resume`] - Checkpointing for crash-safe resume
//! - [`store`] - Key-value storage abstraction backing all persistent state
//! - [`source`] - Episode enumeration from feed manifests
//! - [`processor`] - The external processing callback boundary

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// CLI command implementations
pub mod cli;

/// Credential pool, quota tracking, and circuit breakers
pub mod credentials;

/// Durable progress ledger preventing duplicate processing
pub mod ledger;

/// Observability metrics
pub mod metrics;

/// Batch orchestration, worker pool, and retry policy
pub mod orchestrator;

/// External processing callback boundary
pub mod processor;

/// Checkpointing for crash-safe resume
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Episode enumeration from feed manifests
pub mod source;

/// Key-value storage abstraction for persistent state
pub mod store;

// Re-export commonly used types
pub use orchestrator::{BatchOrchestrator, BatchSummary};

/// A single podcast episode as produced by the enumeration collaborator.
///
/// The fields here are the immutable source attributes that identify an
/// episode; the work-item id is derived from them so the same episode always
/// maps to the same id across runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Episode {
    /// Feed (source collection) the episode belongs to
    pub feed: String,
    /// Episode title
    pub title: String,
    /// Publication time (Unix timestamp in milliseconds)
    pub published_at: i64,
    /// URL of the audio file to process
    pub audio_url: String,
}

impl Episode {
    /// Validate episode data integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.feed.is_empty() {
            return Err("Feed cannot be empty".to_string());
        }

        if self.title.is_empty() {
            return Err("Title cannot be empty".to_string());
        }

        if self.audio_url.is_empty() {
            return Err("Audio URL cannot be empty".to_string());
        }

        if self.published_at <= 0 {
            return Err(format!(
                "Published time must be positive, got {}",
                self.published_at
            ));
        }

        Ok(())
    }
}

/// Processing state of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ItemState {
    /// Item has not been dispatched yet
    #[default]
    Pending,
    /// Item is currently being processed by a worker
    Running,
    /// Item completed successfully
    Succeeded,
    /// Item failed terminally (permanent error or retries exhausted)
    Failed,
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemState::Pending => "pending",
            ItemState::Running => "running",
            ItemState::Succeeded => "succeeded",
            ItemState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A single unit of batch work: one episode tracked through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identifier derived from the episode's immutable attributes
    pub id: String,
    /// The episode payload (opaque to the orchestration layer)
    pub episode: Episode,
    /// Current processing state
    #[serde(default)]
    pub state: ItemState,
    /// Number of processing attempts made so far
    #[serde(default)]
    pub attempts: u32,
    /// Error message from the most recent failure, if any
    #[serde(default)]
    pub last_error: Option<String>,
}

impl WorkItem {
    /// Create a work item from an episode, deriving its stable id.
    pub fn from_episode(episode: Episode) -> Self {
        let id = derive_item_id(&episode.feed, &episode.title, episode.published_at);
        Self {
            id,
            episode,
            state: ItemState::Pending,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Derive a deterministic work-item id from immutable episode attributes.
///
/// The id is a truncated SHA-256 digest of the feed name, title, and
/// publication time, so re-enumerating the same feed always yields the same
/// ids regardless of episode ordering.
pub fn derive_item_id(feed: &str, title: &str, published_at: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feed.as_bytes());
    hasher.update([0x1f]);
    hasher.update(title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(published_at.to_be_bytes());
    let digest = hasher.finalize();

    // 16 bytes of digest is plenty to avoid collisions within a ledger
    // namespace while keeping filenames readable.
    let mut id = String::with_capacity(32);
    for byte in &digest[..16] {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}
