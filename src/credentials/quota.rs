//! Per-credential quota tracking.
//!
//! Each credential carries two independent counting windows: requests per
//! minute and requests per day. Windows are aligned to wall-clock boundaries
//! rather than sliding, which keeps the model simple and auditable against
//! the provider's own usage dashboard.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Milliseconds in one minute window.
const MINUTE_MS: i64 = 60_000;

/// Milliseconds in one day window.
const DAY_MS: i64 = 86_400_000;

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Both windows have headroom; the caller may issue the request.
    Allowed,
    /// At least one window is exhausted.
    Denied {
        /// Minimum wait until the nearer window frees capacity.
        retry_after: Duration,
    },
}

impl QuotaDecision {
    /// Whether the decision permits a call.
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }
}

/// Which window a counter covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Rolling to the next wall-clock minute boundary
    PerMinute,
    /// Rolling to the next UTC day boundary
    PerDay,
}

impl WindowKind {
    fn span_ms(&self) -> i64 {
        match self {
            WindowKind::PerMinute => MINUTE_MS,
            WindowKind::PerDay => DAY_MS,
        }
    }
}

/// A single counting window aligned to wall-clock boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaWindow {
    kind: WindowKind,
    limit: u32,
    count: u32,
    window_start: i64,
}

impl QuotaWindow {
    /// Create an empty window with the given ceiling.
    pub fn new(kind: WindowKind, limit: u32) -> Self {
        Self {
            kind,
            limit,
            count: 0,
            window_start: 0,
        }
    }

    /// The configured ceiling.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Requests counted in the current window (after rolling to `now_ms`).
    pub fn count_at(&self, now_ms: i64) -> u32 {
        if self.aligned_start(now_ms) == self.window_start {
            self.count
        } else {
            0
        }
    }

    /// Remaining headroom at `now_ms`.
    pub fn remaining_at(&self, now_ms: i64) -> u32 {
        self.limit.saturating_sub(self.count_at(now_ms))
    }

    /// Wait until this window next frees capacity.
    fn retry_after(&self, now_ms: i64) -> Duration {
        let window_end = self.aligned_start(now_ms) + self.kind.span_ms();
        Duration::from_millis((window_end - now_ms).max(0) as u64)
    }

    /// Wall-clock-aligned start of the window containing `now_ms`.
    fn aligned_start(&self, now_ms: i64) -> i64 {
        now_ms - now_ms.rem_euclid(self.kind.span_ms())
    }

    /// Reset the counter if the window containing `now_ms` is a new one.
    fn roll(&mut self, now_ms: i64) {
        let start = self.aligned_start(now_ms);
        if start != self.window_start {
            self.window_start = start;
            self.count = 0;
        }
    }

    fn has_headroom(&self, now_ms: i64) -> bool {
        self.count_at(now_ms) < self.limit
    }

    fn record(&mut self, now_ms: i64) {
        self.roll(now_ms);
        self.count += 1;
    }

    /// Copy counters from a persisted window, keeping this window's
    /// configured limit. A restored count above a lowered limit simply keeps
    /// the window denied until it rolls over.
    pub(crate) fn adopt(&mut self, other: &QuotaWindow) {
        self.window_start = other.window_start;
        self.count = other.count;
    }
}

/// Tracks one credential's request counts against its rate and volume
/// ceilings.
///
/// `try_consume` never mutates state; [`QuotaTracker::record_usage`] must be
/// called once for every call actually issued after an `Allowed` decision.
/// The invariant `count <= limit` is enforced by rejecting calls, never by
/// clamping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaTracker {
    minute: QuotaWindow,
    day: QuotaWindow,
}

impl QuotaTracker {
    /// Create a tracker with the given per-minute and per-day ceilings.
    pub fn new(per_minute: u32, per_day: u32) -> Self {
        Self {
            minute: QuotaWindow::new(WindowKind::PerMinute, per_minute),
            day: QuotaWindow::new(WindowKind::PerDay, per_day),
        }
    }

    /// Check whether a call may be issued right now.
    pub fn try_consume(&self) -> QuotaDecision {
        self.try_consume_at(chrono::Utc::now().timestamp_millis())
    }

    /// Check whether a call may be issued at `now_ms`. No side effects.
    pub fn try_consume_at(&self, now_ms: i64) -> QuotaDecision {
        if self.minute.has_headroom(now_ms) && self.day.has_headroom(now_ms) {
            return QuotaDecision::Allowed;
        }

        // Report the nearer of the exhausted windows so the caller can wait
        // intelligently instead of busy-polling.
        let mut retry_after = Duration::MAX;
        if !self.minute.has_headroom(now_ms) {
            retry_after = retry_after.min(self.minute.retry_after(now_ms));
        }
        if !self.day.has_headroom(now_ms) {
            retry_after = retry_after.min(self.day.retry_after(now_ms));
        }
        QuotaDecision::Denied { retry_after }
    }

    /// Count one issued call against both windows.
    pub fn record_usage(&mut self) {
        self.record_usage_at(chrono::Utc::now().timestamp_millis());
    }

    /// Count one issued call against both windows at `now_ms`.
    pub fn record_usage_at(&mut self, now_ms: i64) {
        self.minute.record(now_ms);
        self.day.record(now_ms);
    }

    /// Remaining per-minute headroom at `now_ms`.
    pub fn minute_remaining_at(&self, now_ms: i64) -> u32 {
        self.minute.remaining_at(now_ms)
    }

    /// Remaining per-day headroom at `now_ms`.
    pub fn day_remaining_at(&self, now_ms: i64) -> u32 {
        self.day.remaining_at(now_ms)
    }

    /// The configured per-minute ceiling.
    pub fn minute_limit(&self) -> u32 {
        self.minute.limit()
    }

    /// The configured per-day ceiling.
    pub fn day_limit(&self) -> u32 {
        self.day.limit()
    }

    /// Adopt window counters from a persisted tracker while keeping the
    /// currently configured limits.
    pub fn adopt_usage(&mut self, other: &QuotaTracker) {
        self.minute.adopt(&other.minute);
        self.day.adopt(&other.day);
    }
}
