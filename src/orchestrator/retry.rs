//! The single retry path wrapping every external call.
//!
//! Retry, backoff, and breaker interaction live here and nowhere else:
//! collaborators supply only the call and its error classification. The
//! policy prefers rotating to another credential over waiting on the one
//! that just failed: re-acquiring from the pool after each failure gets
//! rotation for free.

use super::config::{calculate_backoff_with, INITIAL_BACKOFF_MS, MAX_ACQUIRE_WAIT, MAX_ATTEMPTS, MAX_BACKOFF_MS};
use crate::credentials::{CredentialPool, PoolAcquire};
use crate::processor::{ErrorKind, ProcessError};
use crate::shutdown::SharedShutdown;
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Terminal outcome of a wrapped call.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// The call failed with an error retrying cannot fix.
    #[error("permanent failure: {message}")]
    Permanent {
        /// Description of the failure
        message: String,
    },

    /// Transient failures exhausted the attempt budget.
    #[error("gave up after {attempts} attempts: {message}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Last failure description
        message: String,
    },

    /// No credential became available within the maximum total wait.
    /// Distinct from [`RetryError::Permanent`] so operators can tell "the
    /// service rejected this item" from "we ran out of quota for everyone".
    #[error("no credential available after waiting {}s", .waited.as_secs())]
    ResourceExhausted {
        /// Total time spent waiting for a credential
        waited: Duration,
    },

    /// Shutdown was requested while the call was pending.
    #[error("cancelled by shutdown request")]
    Cancelled,
}

impl RetryError {
    /// Whether this outcome should halt the whole batch.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, RetryError::ResourceExhausted { .. })
    }
}

/// Wraps one external operation with credential acquisition, bounded
/// retries, and breaker reporting.
#[derive(Clone)]
pub struct RetryPolicy {
    pool: Arc<CredentialPool>,
    max_attempts: u32,
    max_acquire_wait: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    shutdown: Option<SharedShutdown>,
}

impl RetryPolicy {
    /// Create a policy over `pool` with default bounds.
    pub fn new(pool: Arc<CredentialPool>) -> Self {
        Self {
            pool,
            max_attempts: MAX_ATTEMPTS,
            max_acquire_wait: MAX_ACQUIRE_WAIT,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            shutdown: None,
        }
    }

    /// Override the per-item attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Override the maximum total credential wait.
    pub fn with_max_acquire_wait(mut self, wait: Duration) -> Self {
        self.max_acquire_wait = wait;
        self
    }

    /// Override backoff bounds (tests use tiny delays).
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Attach a shutdown handle; pending waits abort when it fires.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Execute one external operation.
    ///
    /// Acquires a credential (waiting, bounded, when none is eligible),
    /// invokes `call`, and classifies the outcome. Transient failures are
    /// reported to the credential's breaker and retried on a freshly
    /// acquired credential after backoff; permanent failures propagate
    /// immediately. Every issued call reports its outcome to the breaker.
    pub async fn execute<T, F, Fut>(&self, mut call: F) -> Result<T, RetryError>
    where
        F: FnMut(crate::credentials::ApiCredential) -> Fut,
        Fut: Future<Output = Result<T, ProcessError>>,
    {
        let wait_started = Instant::now();
        let mut attempts = 0u32;

        loop {
            if self.shutdown_requested() {
                return Err(RetryError::Cancelled);
            }

            let lease = match self.pool.acquire() {
                PoolAcquire::Acquired(lease) => lease,
                PoolAcquire::NoneAvailable { retry_after } => {
                    let waited = wait_started.elapsed();
                    if waited >= self.max_acquire_wait {
                        counter!("credential_wait_exhausted_total").increment(1);
                        return Err(RetryError::ResourceExhausted { waited });
                    }

                    let remaining = self.max_acquire_wait - waited;
                    let sleep_for = retry_after.min(remaining);
                    debug!(
                        sleep_ms = sleep_for.as_millis() as u64,
                        "no credential available, waiting"
                    );
                    counter!("credential_wait_total").increment(1);
                    if !self.sleep_or_shutdown(sleep_for).await {
                        return Err(RetryError::Cancelled);
                    }
                    continue;
                }
            };

            attempts += 1;
            let key_id = lease.credential().key_id.clone();
            let result = call(lease.credential().clone()).await;

            match result {
                Ok(value) => {
                    lease.complete(true);
                    if attempts > 1 {
                        debug!(key_id = %key_id, attempts, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.kind == ErrorKind::Permanent => {
                    // The service answered; the credential is healthy even
                    // though the item is not.
                    lease.complete(true);
                    warn!(
                        key_id = %key_id,
                        error = %err,
                        suggestion = err.kind.suggestion(),
                        "permanent failure, not retrying"
                    );
                    return Err(RetryError::Permanent {
                        message: err.message,
                    });
                }
                Err(err) => {
                    lease.complete(false);
                    counter!("retry_attempts_total", "kind" => err.kind.label()).increment(1);

                    if attempts >= self.max_attempts {
                        warn!(
                            key_id = %key_id,
                            attempts,
                            error = %err,
                            suggestion = err.kind.suggestion(),
                            "attempt budget exhausted"
                        );
                        return Err(RetryError::Exhausted {
                            attempts,
                            message: err.message,
                        });
                    }

                    let backoff =
                        calculate_backoff_with(attempts, self.initial_backoff, self.max_backoff);
                    warn!(
                        key_id = %key_id,
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying after backoff delay"
                    );
                    if !self.sleep_or_shutdown(backoff).await {
                        return Err(RetryError::Cancelled);
                    }
                }
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    /// Sleep for `duration`, returning false if shutdown fired first.
    async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => true,
                    _ = shutdown.wait_for_shutdown() => false,
                }
            }
            None => {
                tokio::time::sleep(duration).await;
                true
            }
        }
    }
}
