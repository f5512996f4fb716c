//! Orchestration configuration constants

use std::time::Duration;

/// Maximum processing attempts per item per run.
/// Transient failures burn one attempt each; keeping this small prevents a
/// flapping service from amplifying load (backoff covers the rest).
pub const MAX_ATTEMPTS: u32 = 3;

/// Initial backoff delay in milliseconds between attempts on one item.
/// 1 second is long enough for momentary blips to clear but short enough
/// to not overly delay recovery.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds between attempts on one item.
/// 30 seconds caps the exponential curve; longer waits belong to the
/// credential-level breaker, not the per-item retry loop.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Maximum total time one item may spend waiting for a credential.
/// A fully spent daily quota frees within 24 hours; an hour of slack on top
/// covers clock skew and breaker backoffs before the item is declared
/// starved.
pub const MAX_ACQUIRE_WAIT: Duration = Duration::from_secs(25 * 60 * 60);

/// Default worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Calculate exponential backoff delay between attempts.
pub fn calculate_backoff(attempt: u32) -> Duration {
    calculate_backoff_with(
        attempt,
        Duration::from_millis(INITIAL_BACKOFF_MS),
        Duration::from_millis(MAX_BACKOFF_MS),
    )
}

/// Backoff with explicit bounds (tests use tiny delays).
pub fn calculate_backoff_with(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let initial_ms = initial.as_millis() as u64;
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(initial_ms.saturating_mul(factor)).min(max)
}
