//! Integration tests for quota window behavior

use podcast_batch_processor::credentials::{QuotaDecision, QuotaTracker};
use std::time::Duration;

// Midnight-aligned base timestamp so both windows open together.
const T0: i64 = 1_700_006_400_000;
const MINUTE_MS: i64 = 60_000;
const DAY_MS: i64 = 86_400_000;

#[test]
fn test_quota_invariant_under_simulated_clock() {
    let mut quota = QuotaTracker::new(3, 7);
    let mut issued_today = 0u32;

    // Tick through two hours in 10-second steps, consuming greedily.
    for tick in 0..720 {
        let now = T0 + tick * 10_000;
        if quota.try_consume_at(now).is_allowed() {
            quota.record_usage_at(now);
            issued_today += 1;
        }

        // The invariant: remaining headroom never goes negative, meaning
        // count never exceeded either limit.
        assert!(quota.minute_remaining_at(now) <= 3);
        assert!(quota.day_remaining_at(now) <= 7);
    }

    // Day limit bounds total issuance regardless of minute windows.
    assert_eq!(issued_today, 7);
}

#[test]
fn test_no_call_issued_when_denied() {
    let mut quota = QuotaTracker::new(1, 10);
    assert!(quota.try_consume_at(T0).is_allowed());
    quota.record_usage_at(T0);

    // Denials must be pure checks: hammering try_consume changes nothing.
    for i in 0..100 {
        assert!(!quota.try_consume_at(T0 + i).is_allowed());
    }
    assert_eq!(quota.day_remaining_at(T0), 9);
}

#[test]
fn test_minute_window_frees_at_boundary() {
    let mut quota = QuotaTracker::new(2, 100);
    quota.record_usage_at(T0 + 45_000);
    quota.record_usage_at(T0 + 50_000);

    match quota.try_consume_at(T0 + 55_000) {
        QuotaDecision::Denied { retry_after } => {
            // Window is wall-clock aligned: frees at T0 + 60s, i.e. 5s away.
            assert_eq!(retry_after, Duration::from_secs(5));
        }
        QuotaDecision::Allowed => panic!("expected denial"),
    }

    assert!(quota.try_consume_at(T0 + MINUTE_MS).is_allowed());
}

#[test]
fn test_day_window_outlives_minute_windows() {
    let mut quota = QuotaTracker::new(10, 3);
    for i in 0..3 {
        let now = T0 + i * MINUTE_MS;
        assert!(quota.try_consume_at(now).is_allowed());
        quota.record_usage_at(now);
    }

    // Plenty of minute headroom, but the day is spent.
    let now = T0 + 10 * MINUTE_MS;
    match quota.try_consume_at(now) {
        QuotaDecision::Denied { retry_after } => {
            assert!(retry_after > Duration::from_secs(3600));
        }
        QuotaDecision::Allowed => panic!("expected day-limit denial"),
    }

    // A new day starts fresh.
    assert!(quota.try_consume_at(T0 + DAY_MS).is_allowed());
}
