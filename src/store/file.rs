//! File-backed key-value store.
//!
//! Each key maps to one file under the store root. Writes go through a
//! temp file in the same directory followed by an atomic rename, with an
//! advisory lock per key, so a crash mid-write never corrupts the
//! previously committed value and concurrent writers serialize per key.

use super::{KvStore, StoreError};
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix appended to a key's path for its advisory lock file.
const LOCK_EXTENSION: &str = "lock";

/// File-backed [`KvStore`] rooted at a directory.
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| StoreError::Io(format!("failed to create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    /// Resolve a key to its file path, validating every segment.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".to_string()));
        }

        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() {
                return Err(StoreError::InvalidKey(format!(
                    "empty segment in '{key}'"
                )));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
                || segment.starts_with('.')
            {
                return Err(StoreError::InvalidKey(format!(
                    "segment '{segment}' contains unsupported characters"
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn lock_path(path: &Path) -> PathBuf {
        path.with_extension(LOCK_EXTENSION)
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(format!("key '{key}' has no parent")))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Io(format!("failed to create {}: {e}", parent.display())))?;

        // Serialize concurrent writers to the same key.
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(Self::lock_path(&path))
            .map_err(|e| StoreError::Lock(format!("failed to open lock file: {e}")))?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| StoreError::Lock(format!("failed to acquire write lock: {e}")))?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| StoreError::Io(format!("failed to create temp file: {e}")))?;
        temp.write_all(value)
            .map_err(|e| StoreError::Io(format!("failed to write temp file: {e}")))?;
        temp.flush()
            .map_err(|e| StoreError::Io(format!("failed to flush temp file: {e}")))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| StoreError::Io(format!("failed to sync temp file: {e}")))?;
        temp.persist(&path)
            .map_err(|e| StoreError::Io(format!("failed to persist temp file: {e}")))?;

        // Fsync the directory so the rename itself is durable.
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }

        debug!(key = %key, bytes = value.len(), "kv value written");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!(
                "failed to delete {}: {e}",
                path.display()
            ))),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        collect_keys(&self.root, String::new(), &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

fn collect_keys(dir: &Path, key_prefix: String, out: &mut Vec<String>) -> Result<(), StoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(StoreError::Io(format!(
                "failed to read {}: {e}",
                dir.display()
            )))
        }
    };

    for entry in entries {
        let entry = entry.map_err(|e| StoreError::Io(format!("failed to read entry: {e}")))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.ends_with(&format!(".{LOCK_EXTENSION}")) {
            continue;
        }

        let key = if key_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{key_prefix}/{name}")
        };

        let file_type = entry
            .file_type()
            .map_err(|e| StoreError::Io(format!("failed to stat entry: {e}")))?;
        if file_type.is_dir() {
            collect_keys(&entry.path(), key, out)?;
        } else {
            out.push(key);
        }
    }
    Ok(())
}
