//! Credential management: API keys, per-key quota tracking, and per-key
//! circuit breakers.
//!
//! The external service enforces rate and daily-volume limits per key.
//! Every key is paired with its own [`QuotaTracker`] and [`CircuitBreaker`]
//! and handed out by the [`CredentialPool`], which is the single
//! synchronization point for all per-key mutable state.

pub mod breaker;
pub mod pool;
pub mod quota;

pub use breaker::{BreakerState, CircuitBreaker};
pub use pool::{CredentialLease, CredentialPool, CredentialStatus, PoolAcquire, UsageSnapshot};
pub use quota::{QuotaDecision, QuotaTracker, QuotaWindow, WindowKind};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// An API key/secret pair for the external processing service.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiCredential {
    /// Stable identifier for the key (used in logs, status output, and
    /// persisted usage state)
    pub key_id: String,
    /// The secret itself; never logged
    pub secret: String,
}

impl ApiCredential {
    /// Create a credential.
    pub fn new(key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            secret: secret.into(),
        }
    }
}

// Manual Debug so the secret never leaks into logs or panic messages.
impl std::fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredential")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One entry in the operator's keys file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySpec {
    /// Key identifier
    pub key_id: String,
    /// Key secret
    pub secret: String,
    /// Per-minute request ceiling for this key
    pub per_minute_limit: u32,
    /// Per-day request ceiling for this key
    pub per_day_limit: u32,
}

/// Load key specifications from a JSON keys file.
///
/// The file is a JSON array of objects with `key_id`, `secret`,
/// `per_minute_limit`, and `per_day_limit` fields.
pub fn load_keys_file(path: &Path) -> Result<Vec<KeySpec>, CredentialError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CredentialError::Io(format!("failed to read {}: {e}", path.display())))?;

    let specs: Vec<KeySpec> = serde_json::from_str(&contents)
        .map_err(|e| CredentialError::Parse(format!("invalid keys file: {e}")))?;

    if specs.is_empty() {
        return Err(CredentialError::NoCredentials);
    }

    let mut seen = std::collections::HashSet::new();
    for spec in &specs {
        if spec.key_id.is_empty() {
            return Err(CredentialError::Invalid("key_id cannot be empty".into()));
        }
        if spec.secret.is_empty() {
            return Err(CredentialError::Invalid(format!(
                "secret for key '{}' cannot be empty",
                spec.key_id
            )));
        }
        if spec.per_minute_limit == 0 || spec.per_day_limit == 0 {
            return Err(CredentialError::Invalid(format!(
                "limits for key '{}' must be positive",
                spec.key_id
            )));
        }
        if !seen.insert(spec.key_id.clone()) {
            return Err(CredentialError::Invalid(format!(
                "duplicate key_id '{}'",
                spec.key_id
            )));
        }
    }

    Ok(specs)
}

/// Credential errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// IO error reading the keys file
    #[error("IO error: {0}")]
    Io(String),

    /// Keys file could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Keys file contained no credentials
    #[error("no credentials configured")]
    NoCredentials,

    /// A key specification failed validation
    #[error("invalid credential: {0}")]
    Invalid(String),
}
