//! Checkpoint types for crash-safe resume.

use crate::ItemState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current checkpoint schema version.
pub(crate) const SCHEMA_VERSION: &str = "1.0.0";

/// Per-item state captured in a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemRecord {
    /// Processing state at checkpoint time
    pub state: ItemState,
    /// Attempts made so far
    pub attempts: u32,
    /// Most recent error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ItemRecord {
    /// A fresh pending record.
    pub fn pending() -> Self {
        Self {
            state: ItemState::Pending,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Durable snapshot of one batch's in-flight state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    schema_version: String,
    batch_id: String,
    items: BTreeMap<String, ItemRecord>,
    created_at: i64,
    updated_at: i64,
}

impl Checkpoint {
    /// Create an empty checkpoint for `batch_id`.
    pub fn new(batch_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            batch_id: batch_id.into(),
            items: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The batch this checkpoint belongs to.
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Creation time (Unix timestamp in milliseconds).
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Last update time (Unix timestamp in milliseconds).
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// All item records.
    pub fn items(&self) -> &BTreeMap<String, ItemRecord> {
        &self.items
    }

    /// The record for `item_id`, if present.
    pub fn record(&self, item_id: &str) -> Option<&ItemRecord> {
        self.items.get(item_id)
    }

    /// Insert or replace the record for `item_id`.
    pub fn upsert(&mut self, item_id: impl Into<String>, record: ItemRecord) {
        self.items.insert(item_id.into(), record);
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Reset every `Running` item back to `Pending`.
    ///
    /// A `Running` record in a loaded checkpoint means the previous process
    /// died mid-call; the item was never recorded done, so it is safe to
    /// re-dispatch.
    pub fn reset_interrupted(&mut self) -> usize {
        let mut reset = 0;
        for record in self.items.values_mut() {
            if record.state == ItemState::Running {
                record.state = ItemState::Pending;
                reset += 1;
            }
        }
        if reset > 0 {
            self.updated_at = chrono::Utc::now().timestamp_millis();
        }
        reset
    }

    /// Counts of items by state.
    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for record in self.items.values() {
            match record.state {
                ItemState::Pending => counts.pending += 1,
                ItemState::Running => counts.running += 1,
                ItemState::Succeeded => counts.succeeded += 1,
                ItemState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub(crate) fn schema_version(&self) -> &str {
        &self.schema_version
    }
}

/// Item counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    /// Items not yet dispatched
    pub pending: usize,
    /// Items currently running
    pub running: usize,
    /// Items completed successfully
    pub succeeded: usize,
    /// Items failed terminally
    pub failed: usize,
}

impl StateCounts {
    /// Total items tracked.
    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed
    }
}
