//! Aggregate batch progress tracking.
//!
//! Long batches emit periodic user-facing updates: counts by state, current
//! throughput, and an estimated time remaining derived from observed
//! per-item rates. Emission is cadence-limited so logs stay readable at any
//! batch size.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);
const MIN_RUN_DURATION: Duration = Duration::from_secs(10);

/// Lightweight builder that controls update cadence.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    update_interval: Duration,
    min_percentage_step: f64,
}

impl ProgressTracker {
    /// Create a tracker with custom interval and percentage step.
    pub fn new(update_interval: Duration, min_percentage_step: f64) -> Self {
        Self {
            update_interval,
            min_percentage_step,
        }
    }

    /// Build a [`BatchProgress`] configured with the tracker settings.
    pub fn create_progress(&self, total: usize) -> BatchProgress {
        let now = Instant::now();
        BatchProgress {
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            started: now,
            last_update: now,
            update_interval: self.update_interval,
            min_percentage_step: self.min_percentage_step,
            last_reported_percentage: 0.0,
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL, 10.0)
    }
}

/// Progress over the items dispatched in one batch run.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    /// Items the run set out to settle (dispatched + skipped).
    pub total: usize,
    /// Items completed successfully this run.
    pub succeeded: usize,
    /// Items failed terminally this run.
    pub failed: usize,
    /// Items skipped because the ledger already had them.
    pub skipped: usize,
    started: Instant,
    last_update: Instant,
    update_interval: Duration,
    min_percentage_step: f64,
    last_reported_percentage: f64,
}

impl BatchProgress {
    /// Items settled so far (succeeded + failed + skipped).
    pub fn settled(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.settled() as f64 / self.total as f64) * 100.0
    }

    /// Observed throughput in items per second, excluding skipped items.
    pub fn rate(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.succeeded + self.failed) as f64 / elapsed
    }

    /// Estimated time remaining based on observed per-item throughput.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let rate = self.rate();
        if rate <= 0.0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.settled());
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    /// Elapsed wall time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether a progress update should be emitted based on time or
    /// percentage movement.
    pub fn should_emit_update(&self) -> bool {
        if self.settled() == 0 {
            return false;
        }

        if self.percentage() - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }

        self.started.elapsed() >= MIN_RUN_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress log to reset timers and cached
    /// percentage.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        self.last_reported_percentage = self.percentage();
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] Settled {}/{} episodes - {:.1}% complete",
            self.settled(),
            self.total,
            self.percentage()
        )];

        parts.push(format!(
            "({} ok, {} failed, {} skipped)",
            self.succeeded, self.failed, self.skipped
        ));

        let rate = self.rate();
        if rate > 0.0 {
            parts.push(format!("at {:.2} episodes/sec", rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

pub(crate) fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
