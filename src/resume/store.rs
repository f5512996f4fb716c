//! Checkpoint persistence with atomic writes.
//!
//! One file per `batch_id`. Saves go through a temp file plus rename under
//! an advisory lock, so a reader never observes a partial write and a crash
//! mid-save leaves the previously committed checkpoint intact. Loads are
//! tolerant: missing or corrupt files read as "no checkpoint", signaling a
//! fresh batch.

use super::checkpoint::{Checkpoint, SCHEMA_VERSION};
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Stores checkpoints as JSON files under a directory.
#[derive(Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store writing under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the checkpoint file for `batch_id`.
    pub fn path_for(&self, batch_id: &str) -> PathBuf {
        // Batch ids come from operators; flatten anything path-like.
        let safe: String = batch_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    /// Atomically persist `checkpoint`.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(checkpoint.batch_id());
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| CheckpointError::Io(format!("failed to create {}: {e}", self.dir.display())))?;

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path.with_extension("lock"))
            .map_err(|e| CheckpointError::Lock(format!("failed to open lock file: {e}")))?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| CheckpointError::Lock(format!("failed to acquire write lock: {e}")))?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| CheckpointError::Io(format!("failed to create temp file: {e}")))?;
        temp.write_all(json.as_bytes())
            .map_err(|e| CheckpointError::Io(format!("failed to write temp file: {e}")))?;
        temp.flush()
            .map_err(|e| CheckpointError::Io(format!("failed to flush temp file: {e}")))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| CheckpointError::Io(format!("failed to sync temp file: {e}")))?;
        temp.persist(&path)
            .map_err(|e| CheckpointError::Io(format!("failed to persist temp file: {e}")))?;

        if let Ok(dir) = std::fs::File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!(
            batch_id = %checkpoint.batch_id(),
            items = checkpoint.items().len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Load the checkpoint for `batch_id`.
    ///
    /// Returns `None` for a missing, unreadable, corrupt, or
    /// schema-incompatible file; the caller starts a fresh batch. This never
    /// raises: a bad checkpoint must not block a new run.
    pub fn load(&self, batch_id: &str) -> Option<Checkpoint> {
        let path = self.path_for(batch_id);
        if !path.exists() {
            debug!(batch_id = %batch_id, "no checkpoint found, starting fresh");
            return None;
        }

        let contents = match read_locked(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable checkpoint, starting fresh");
                return None;
            }
        };

        let checkpoint: Checkpoint = match serde_json::from_str(&contents) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt checkpoint, starting fresh");
                return None;
            }
        };

        if checkpoint.schema_version() != SCHEMA_VERSION {
            warn!(
                found = %checkpoint.schema_version(),
                expected = SCHEMA_VERSION,
                "checkpoint schema mismatch, starting fresh"
            );
            return None;
        }

        if checkpoint.batch_id() != batch_id {
            warn!(
                found = %checkpoint.batch_id(),
                expected = %batch_id,
                "checkpoint batch id mismatch, starting fresh"
            );
            return None;
        }

        info!(
            batch_id = %batch_id,
            items = checkpoint.items().len(),
            "resuming from checkpoint"
        );
        Some(checkpoint)
    }
}

fn read_locked(path: &Path) -> Result<String, String> {
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path.with_extension("lock"))
        .map_err(|e| format!("failed to open lock file: {e}"))?;
    let lock = RwLock::new(lock_file);
    let _guard = lock
        .read()
        .map_err(|e| format!("failed to acquire read lock: {e}"))?;

    std::fs::read_to_string(path).map_err(|e| e.to_string())
}

/// Checkpoint store errors.
///
/// Only writes can fail; a failed save is fatal to the batch because
/// continuing without durability would break the crash-safety contract.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Lock error
    #[error("lock error: {0}")]
    Lock(String),
}
