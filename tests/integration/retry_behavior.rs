//! Integration tests for retry policy and breaker interaction

use podcast_batch_processor::credentials::{
    ApiCredential, BreakerState, CircuitBreaker, CredentialPool,
};
use podcast_batch_processor::orchestrator::{RetryError, RetryPolicy};
use podcast_batch_processor::processor::ProcessError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn single_key_pool(breaker_threshold: u32, backoff: Duration) -> Arc<CredentialPool> {
    let keys = vec![(ApiCredential::new("key-0", "secret"), 1000, 100_000)];
    let breaker = CircuitBreaker::new(breaker_threshold, backoff, backoff * 4);
    Arc::new(CredentialPool::with_breaker(keys, breaker).unwrap())
}

/// Scenario: one credential, the callback fails 5 times consecutively
/// (threshold = 5) and then succeeds. The breaker opens after the 5th
/// failure, rejects calls until its backoff elapses, and the 6th call (the
/// eventual success) closes it again.
#[tokio::test]
async fn test_breaker_opens_then_recovers_through_retry_policy() {
    let pool = single_key_pool(5, Duration::from_millis(50));
    let policy = RetryPolicy::new(pool.clone())
        .with_max_attempts(10)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
        .with_max_acquire_wait(Duration::from_secs(10));

    let calls = Arc::new(AtomicU32::new(0));
    let calls_in = calls.clone();

    let started = std::time::Instant::now();
    let result: Result<(), RetryError> = policy
        .execute(move |_cred| {
            let n = calls_in.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 5 {
                    Err(ProcessError::transient("service flapping"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    // The 6th call could only happen after the breaker's open period, so
    // the elapsed time must cover it.
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(pool.status()[0].breaker_state, BreakerState::Closed);
}

#[tokio::test]
async fn test_permanent_failure_leaves_breaker_closed() {
    let pool = single_key_pool(2, Duration::from_millis(50));
    let policy = RetryPolicy::new(pool.clone())
        .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
        .with_max_acquire_wait(Duration::from_millis(200));

    // Permanent failures mean the service answered; they must not trip the
    // breaker no matter how many items hit them.
    for _ in 0..10 {
        let result: Result<(), RetryError> = policy
            .execute(|_cred| async { Err(ProcessError::permanent("unsupported format")) })
            .await;
        assert!(matches!(result, Err(RetryError::Permanent { .. })));
    }

    assert_eq!(pool.status()[0].breaker_state, BreakerState::Closed);
}

#[tokio::test]
async fn test_rotation_preferred_over_waiting() {
    // Two credentials; the first fails transiently, and the retry must land
    // on the other credential rather than waiting on the first.
    let keys = vec![
        (ApiCredential::new("key-0", "s"), 1000, 100_000),
        (ApiCredential::new("key-1", "s"), 1000, 100_000),
    ];
    let pool = Arc::new(CredentialPool::new(keys).unwrap());
    let policy = RetryPolicy::new(pool)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
        .with_max_acquire_wait(Duration::from_secs(5));

    let used = Arc::new(std::sync::Mutex::new(Vec::new()));
    let used_in = used.clone();

    let result: Result<(), RetryError> = policy
        .execute(move |cred| {
            let used = used_in.clone();
            async move {
                let mut used = used.lock().unwrap();
                used.push(cred.key_id.clone());
                if used.len() == 1 {
                    Err(ProcessError::transient("first key hiccup"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    let used = used.lock().unwrap();
    assert_eq!(used.as_slice(), ["key-0", "key-1"]);
}

#[tokio::test]
async fn test_rate_limit_response_is_retried() {
    let pool = single_key_pool(10, Duration::from_millis(50));
    let policy = RetryPolicy::new(pool)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
        .with_max_acquire_wait(Duration::from_secs(5));

    let calls = Arc::new(AtomicU32::new(0));
    let calls_in = calls.clone();
    let result: Result<(), RetryError> = policy
        .execute(move |_cred| {
            let n = calls_in.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ProcessError::rate_limited("429 from service"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
