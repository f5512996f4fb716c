//! Key-value storage abstraction for persistent state.
//!
//! Business logic never touches the filesystem directly: the progress
//! ledger and credential usage snapshots go through the [`KvStore`] trait,
//! with a file-backed implementation for tests and small deployments and
//! room for an embedded-DB backend later.

pub mod file;

pub use file::FileKvStore;

/// Durable key-value storage.
///
/// Keys are `/`-separated paths of conservative segments. Writes are atomic
/// per key and safe under concurrent writers to distinct keys.
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Atomically write `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove the value under `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys beginning with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Key contains segments the backend cannot represent
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Serialization error from a caller encoding a value
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Lock error
    #[error("lock error: {0}")]
    Lock(String),
}
