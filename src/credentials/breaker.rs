//! Per-credential circuit breaker.
//!
//! A three-state failure-isolation machine: `Closed` passes calls through,
//! `Open` rejects them immediately, and `HalfOpen` permits a single trial
//! call once the open backoff has elapsed. Each credential owns its own
//! instance so one faulty key never blocks the rest of the pool.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Consecutive failures before the breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// First open period. Doubles on each failed trial call.
pub const DEFAULT_OPEN_BACKOFF_BASE: Duration = Duration::from_secs(30 * 60);

/// Ceiling for the open period (30min -> 1h -> 2h, then stays at 2h).
pub const DEFAULT_OPEN_BACKOFF_MAX: Duration = Duration::from_secs(2 * 60 * 60);

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation; calls pass through.
    Closed,
    /// Calls rejected until the open backoff elapses.
    Open,
    /// One trial call permitted to probe recovery.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        };
        write!(f, "{s}")
    }
}

/// Circuit breaker state machine.
///
/// `allow_call` answers whether a call may be issued (and performs the timed
/// `Open -> HalfOpen` transition); `on_result` feeds the outcome of every
/// issued call back into the machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    threshold: u32,
    opened_at: Option<i64>,
    backoff_index: u32,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_OPEN_BACKOFF_BASE,
            DEFAULT_OPEN_BACKOFF_MAX,
        )
    }
}

impl CircuitBreaker {
    /// Create a breaker with explicit threshold and open-backoff bounds.
    pub fn new(threshold: u32, backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            threshold: threshold.max(1),
            opened_at: None,
            backoff_index: 0,
            backoff_base_ms: backoff_base.as_millis() as u64,
            backoff_max_ms: backoff_max.as_millis() as u64,
        }
    }

    /// Current state (after any timed transition at `now_ms` would apply,
    /// callers that need the transition should use `allow_call_at`).
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Consecutive failure count while `Closed`.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether a call may be issued right now.
    pub fn allow_call(&mut self) -> bool {
        self.allow_call_at(chrono::Utc::now().timestamp_millis())
    }

    /// Whether a call may be issued at `now_ms`.
    ///
    /// In `Open`, transitions to `HalfOpen` once the backoff has elapsed and
    /// then permits the trial call.
    pub fn allow_call_at(&mut self, now_ms: i64) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let opened_at = self.opened_at.unwrap_or(now_ms);
                let elapsed = (now_ms - opened_at).max(0) as u64;
                if elapsed >= self.current_backoff_ms() {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report the outcome of an issued call.
    pub fn on_result(&mut self, success: bool) {
        self.on_result_at(success, chrono::Utc::now().timestamp_millis());
    }

    /// Report the outcome of an issued call at `now_ms`.
    pub fn on_result_at(&mut self, success: bool, now_ms: i64) {
        match (self.state, success) {
            (BreakerState::Closed, true) => {
                self.consecutive_failures = 0;
            }
            (BreakerState::Closed, false) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.threshold {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(now_ms);
                    self.backoff_index = 0;
                }
            }
            (BreakerState::HalfOpen, true) => {
                self.state = BreakerState::Closed;
                self.consecutive_failures = 0;
                self.backoff_index = 0;
                self.opened_at = None;
            }
            (BreakerState::HalfOpen, false) => {
                self.state = BreakerState::Open;
                self.backoff_index += 1;
                self.opened_at = Some(now_ms);
            }
            // A result arriving while Open means the call was issued before
            // the breaker tripped; the failure is already counted.
            (BreakerState::Open, _) => {}
        }
    }

    /// Wait until an `Open` breaker will next permit a trial call.
    /// Returns zero for `Closed`/`HalfOpen`.
    pub fn retry_after_at(&self, now_ms: i64) -> Duration {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => Duration::ZERO,
            BreakerState::Open => {
                let opened_at = self.opened_at.unwrap_or(now_ms);
                let reopens_at = opened_at + self.current_backoff_ms() as i64;
                Duration::from_millis((reopens_at - now_ms).max(0) as u64)
            }
        }
    }

    fn current_backoff_ms(&self) -> u64 {
        let factor = 2u64.saturating_pow(self.backoff_index);
        self.backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms)
    }
}
