//! Durable progress ledger.
//!
//! The ledger is the sole source of truth for "this episode was already
//! processed successfully". It is consulted before scheduling and updated
//! after every success, so neither a resumed batch nor a re-run ever
//! re-dispatches completed work.
//!
//! The read side deliberately fails open: unreadable or corrupt records are
//! treated as "not done", trading possible duplicate work for never silently
//! skipping real work.

use crate::store::{KvStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// A completed-work record keyed by `(namespace, item_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressRecord {
    /// Logical partition isolating unrelated batches
    pub namespace: String,
    /// Work item id
    pub item_id: String,
    /// Completion time (Unix timestamp in milliseconds)
    pub completed_at: i64,
}

/// Durable record of which work items have completed successfully.
#[derive(Clone)]
pub struct ProgressLedger {
    store: Arc<dyn KvStore>,
}

impl ProgressLedger {
    /// Create a ledger over the given store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    // Namespaces come from feed names; flatten anything the file backend
    // cannot represent. Item ids are hex digests and pass through as-is.
    fn sanitize(namespace: &str) -> String {
        let mut safe: String = namespace
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if safe.is_empty() || safe.starts_with('.') {
            safe.insert(0, '_');
        }
        safe
    }

    fn key(namespace: &str, item_id: &str) -> String {
        format!("ledger/{}/{item_id}", Self::sanitize(namespace))
    }

    /// Whether `(namespace, item_id)` has a completion record.
    ///
    /// Never returns a false positive. Storage or decode failures are
    /// logged and read as "not done" so the item gets re-processed rather
    /// than silently dropped.
    pub fn is_done(&self, namespace: &str, item_id: &str) -> bool {
        let key = Self::key(namespace, item_id);
        match self.store.get(&key) {
            Ok(Some(bytes)) => match serde_json::from_slice::<ProgressRecord>(&bytes) {
                Ok(record) => record.namespace == namespace && record.item_id == item_id,
                Err(e) => {
                    warn!(key = %key, error = %e, "corrupt ledger record, treating as not done");
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                warn!(key = %key, error = %e, "unreadable ledger record, treating as not done");
                false
            }
        }
    }

    /// Record `(namespace, item_id)` as permanently completed.
    ///
    /// Errors here are fatal to the batch: losing the durability guarantee
    /// would allow duplicate processing after a restart.
    pub fn mark_done(&self, namespace: &str, item_id: &str) -> Result<(), LedgerError> {
        let record = ProgressRecord {
            namespace: namespace.to_string(),
            item_id: item_id.to_string(),
            completed_at: chrono::Utc::now().timestamp_millis(),
        };
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        self.store.put(&Self::key(namespace, item_id), &bytes)?;
        debug!(namespace = %namespace, item_id = %item_id, "item marked done");
        Ok(())
    }

    /// Count completion records in `namespace`.
    pub fn count(&self, namespace: &str) -> Result<usize, LedgerError> {
        let prefix = format!("ledger/{}/", Self::sanitize(namespace));
        let keys = self.store.list(&prefix)?;
        Ok(keys.len())
    }
}

/// Ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Underlying storage error
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Record could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),
}
