//! Credential pool with round-robin selection.
//!
//! The pool is the single mutual-exclusion point for all per-key mutable
//! state: one internal lock guards every credential's breaker+quota pair, so
//! concurrent workers can never double-spend a quota slot. At most one
//! external call is in flight per credential at a time.

use super::breaker::{BreakerState, CircuitBreaker};
use super::quota::{QuotaDecision, QuotaTracker};
use super::{ApiCredential, CredentialError, KeySpec};
use crate::store::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Usage snapshot schema version persisted alongside checkpoints.
const USAGE_SCHEMA_VERSION: &str = "1.0.0";

/// KV key under which per-credential usage is persisted.
const USAGE_KEY: &str = "credentials/usage";

/// Hint returned when every credential is busy with an in-flight call;
/// callers should poll again shortly rather than wait a full quota window.
const IN_FLIGHT_RETRY_HINT: Duration = Duration::from_secs(1);

/// Outcome of a pool acquisition attempt.
pub enum PoolAcquire {
    /// A credential was selected and its quota slot consumed.
    Acquired(CredentialLease),
    /// No credential is currently eligible.
    NoneAvailable {
        /// Minimum wait across all denied credentials before one may free up.
        retry_after: Duration,
    },
}

struct Slot {
    credential: ApiCredential,
    quota: QuotaTracker,
    breaker: CircuitBreaker,
    in_flight: bool,
    last_used: i64,
}

struct PoolInner {
    slots: Vec<Slot>,
    /// Index one past the last-used slot; rotation starts here.
    cursor: usize,
}

/// Owns the configured credentials and selects an eligible one per call.
///
/// Selection iterates in round-robin order starting after the last-used
/// credential, which keeps load spread evenly and prevents starvation.
pub struct CredentialPool {
    inner: Mutex<PoolInner>,
}

impl CredentialPool {
    /// Build a pool from `(credential, per_minute_limit, per_day_limit)`
    /// triples with default breaker settings.
    pub fn new(keys: Vec<(ApiCredential, u32, u32)>) -> Result<Self, CredentialError> {
        Self::with_breaker(keys, CircuitBreaker::default())
    }

    /// Build a pool whose credentials all start from the given breaker
    /// template (used to shorten backoffs in tests).
    pub fn with_breaker(
        keys: Vec<(ApiCredential, u32, u32)>,
        breaker_template: CircuitBreaker,
    ) -> Result<Self, CredentialError> {
        if keys.is_empty() {
            return Err(CredentialError::NoCredentials);
        }

        let slots = keys
            .into_iter()
            .map(|(credential, per_minute, per_day)| Slot {
                credential,
                quota: QuotaTracker::new(per_minute, per_day),
                breaker: breaker_template.clone(),
                in_flight: false,
                last_used: 0,
            })
            .collect();

        Ok(Self {
            inner: Mutex::new(PoolInner { slots, cursor: 0 }),
        })
    }

    /// Build a pool from operator key specifications.
    pub fn from_specs(specs: Vec<KeySpec>) -> Result<Self, CredentialError> {
        let keys = specs
            .into_iter()
            .map(|spec| {
                (
                    ApiCredential::new(spec.key_id, spec.secret),
                    spec.per_minute_limit,
                    spec.per_day_limit,
                )
            })
            .collect();
        Self::new(keys)
    }

    /// Number of configured credentials.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("pool lock poisoned").slots.len()
    }

    /// Whether the pool has no credentials (never true after construction).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire an eligible credential, consuming its quota slot.
    pub fn acquire(self: &Arc<Self>) -> PoolAcquire {
        self.acquire_at(chrono::Utc::now().timestamp_millis())
    }

    /// Acquire an eligible credential at `now_ms`.
    ///
    /// A credential is eligible when it has no call in flight, its breaker
    /// permits a call, and both quota windows have headroom. The first
    /// eligible credential in rotation order wins and its quota slot is
    /// consumed before the lease is returned.
    pub fn acquire_at(self: &Arc<Self>, now_ms: i64) -> PoolAcquire {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        let n = inner.slots.len();
        let start = inner.cursor;

        let mut min_retry_after = Duration::MAX;

        for offset in 0..n {
            let idx = (start + offset) % n;
            let slot = &mut inner.slots[idx];

            if slot.in_flight {
                min_retry_after = min_retry_after.min(IN_FLIGHT_RETRY_HINT);
                continue;
            }

            if !slot.breaker.allow_call_at(now_ms) {
                min_retry_after = min_retry_after.min(slot.breaker.retry_after_at(now_ms));
                continue;
            }

            match slot.quota.try_consume_at(now_ms) {
                QuotaDecision::Allowed => {
                    slot.quota.record_usage_at(now_ms);
                    slot.in_flight = true;
                    slot.last_used = now_ms;
                    let credential = slot.credential.clone();
                    inner.cursor = (idx + 1) % n;

                    debug!(key_id = %credential.key_id, "credential acquired");
                    return PoolAcquire::Acquired(CredentialLease {
                        pool: Arc::clone(self),
                        credential,
                        settled: false,
                    });
                }
                QuotaDecision::Denied { retry_after } => {
                    min_retry_after = min_retry_after.min(retry_after);
                }
            }
        }

        // Defensive floor: a pool with all breakers freshly opened could
        // otherwise report Duration::MAX.
        let retry_after = if min_retry_after == Duration::MAX {
            IN_FLIGHT_RETRY_HINT
        } else {
            min_retry_after
        };

        debug!(retry_after_ms = retry_after.as_millis() as u64, "no credential available");
        PoolAcquire::NoneAvailable { retry_after }
    }

    /// Report a call outcome for `key_id` and release its in-flight slot.
    fn finish(&self, key_id: &str, success: bool, now_ms: i64) {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        if let Some(slot) = inner.slots.iter_mut().find(|s| s.credential.key_id == key_id) {
            slot.in_flight = false;
            let before = slot.breaker.state();
            slot.breaker.on_result_at(success, now_ms);
            let after = slot.breaker.state();
            if before != after {
                debug!(key_id = %key_id, from = %before, to = %after, "breaker transition");
            }
        }
    }

    /// Release the in-flight slot without reporting an outcome (lease
    /// dropped without a result, e.g. on cancellation).
    fn abandon(&self, key_id: &str) {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        if let Some(slot) = inner.slots.iter_mut().find(|s| s.credential.key_id == key_id) {
            slot.in_flight = false;
        }
    }

    /// Capture per-credential quota and breaker state for persistence.
    pub fn snapshot_usage(&self) -> UsageSnapshot {
        let inner = self.inner.lock().expect("pool lock poisoned");
        let keys = inner
            .slots
            .iter()
            .map(|slot| {
                (
                    slot.credential.key_id.clone(),
                    KeyUsage {
                        quota: slot.quota.clone(),
                        breaker: slot.breaker.clone(),
                    },
                )
            })
            .collect();
        UsageSnapshot {
            schema_version: USAGE_SCHEMA_VERSION.to_string(),
            keys,
        }
    }

    /// Restore quota counts and breaker state from a persisted snapshot.
    ///
    /// Counts are adopted onto the currently configured limits, so editing
    /// the keys file between runs takes effect without losing usage history.
    /// Unknown key ids in the snapshot are ignored.
    pub fn restore_usage(&self, snapshot: &UsageSnapshot) {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        for slot in inner.slots.iter_mut() {
            if let Some(usage) = snapshot.keys.get(&slot.credential.key_id) {
                slot.quota.adopt_usage(&usage.quota);
                slot.breaker = usage.breaker.clone();
            }
        }
    }

    /// Per-credential status for the operator surface.
    pub fn status(&self) -> Vec<CredentialStatus> {
        self.status_at(chrono::Utc::now().timestamp_millis())
    }

    /// Per-credential status at `now_ms`.
    pub fn status_at(&self, now_ms: i64) -> Vec<CredentialStatus> {
        let inner = self.inner.lock().expect("pool lock poisoned");
        inner
            .slots
            .iter()
            .map(|slot| CredentialStatus {
                key_id: slot.credential.key_id.clone(),
                minute_remaining: slot.quota.minute_remaining_at(now_ms),
                minute_limit: slot.quota.minute_limit(),
                day_remaining: slot.quota.day_remaining_at(now_ms),
                day_limit: slot.quota.day_limit(),
                breaker_state: slot.breaker.state(),
                in_flight: slot.in_flight,
                last_used_at: (slot.last_used > 0).then_some(slot.last_used),
            })
            .collect()
    }
}

/// A credential handed out by the pool for exactly one external call.
///
/// The quota slot was already consumed at acquisition. Call
/// [`CredentialLease::complete`] with the call outcome; a lease dropped
/// without completing releases the in-flight slot without driving the
/// breaker (the call never produced a result).
pub struct CredentialLease {
    pool: Arc<CredentialPool>,
    credential: ApiCredential,
    settled: bool,
}

impl CredentialLease {
    /// The leased credential.
    pub fn credential(&self) -> &ApiCredential {
        &self.credential
    }

    /// Report the call outcome to the credential's breaker and release the
    /// in-flight slot.
    pub fn complete(mut self, success: bool) {
        self.complete_at(success, chrono::Utc::now().timestamp_millis());
    }

    /// Report the call outcome at `now_ms`.
    pub fn complete_at(&mut self, success: bool, now_ms: i64) {
        if !self.settled {
            self.settled = true;
            self.pool.finish(&self.credential.key_id, success, now_ms);
        }
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        if !self.settled {
            self.pool.abandon(&self.credential.key_id);
        }
    }
}

/// Persisted quota and breaker state for one credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyUsage {
    /// Quota window counters
    pub quota: QuotaTracker,
    /// Breaker state machine
    pub breaker: CircuitBreaker,
}

/// Persisted per-credential usage, keyed by `key_id`.
///
/// Saved through the key-value store so daily quota consumption and open
/// breakers survive process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Snapshot schema version
    pub schema_version: String,
    /// Usage by key id
    pub keys: BTreeMap<String, KeyUsage>,
}

impl UsageSnapshot {
    /// Persist the snapshot.
    pub fn save_to(&self, store: &dyn KvStore) -> Result<(), crate::store::StoreError> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| {
            crate::store::StoreError::Serialization(format!("usage snapshot: {e}"))
        })?;
        store.put(USAGE_KEY, &bytes)
    }

    /// Load a previously persisted snapshot.
    ///
    /// Missing, corrupt, or schema-incompatible state yields `None`; usage
    /// tracking then starts from fresh counters.
    pub fn load_from(store: &dyn KvStore) -> Option<UsageSnapshot> {
        let bytes = match store.get(USAGE_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read credential usage, starting fresh");
                return None;
            }
        };

        match serde_json::from_slice::<UsageSnapshot>(&bytes) {
            Ok(snapshot) if snapshot.schema_version == USAGE_SCHEMA_VERSION => Some(snapshot),
            Ok(snapshot) => {
                warn!(
                    found = %snapshot.schema_version,
                    expected = USAGE_SCHEMA_VERSION,
                    "credential usage schema mismatch, starting fresh"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "corrupt credential usage, starting fresh");
                None
            }
        }
    }
}

/// Operator-facing view of one credential's health.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    /// Key identifier
    pub key_id: String,
    /// Remaining per-minute headroom
    pub minute_remaining: u32,
    /// Per-minute ceiling
    pub minute_limit: u32,
    /// Remaining per-day headroom
    pub day_remaining: u32,
    /// Per-day ceiling
    pub day_limit: u32,
    /// Breaker state
    pub breaker_state: BreakerState,
    /// Whether a call is currently in flight on this credential
    pub in_flight: bool,
    /// When this credential last served a call (Unix millis), if ever
    pub last_used_at: Option<i64>,
}
