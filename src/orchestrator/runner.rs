//! The batch orchestrator: the only component that touches both the
//! scheduling path and the durability path.
//!
//! Work flows one way for scheduling (orchestrator -> worker pool -> retry
//! policy -> credential pool -> processing callback) and one way for
//! durability (results -> ledger/checkpoint). The checkpoint is persisted
//! after every state transition so a crash at any point loses no progress.

use super::config::{
    DEFAULT_CONCURRENCY, INITIAL_BACKOFF_MS, MAX_ACQUIRE_WAIT, MAX_ATTEMPTS, MAX_BACKOFF_MS,
};
use super::progress::{BatchProgress, ProgressTracker};
use super::retry::{RetryError, RetryPolicy};
use super::OrchestratorError;
use crate::credentials::CredentialPool;
use crate::ledger::ProgressLedger;
use crate::processor::EpisodeProcessor;
use crate::resume::{Checkpoint, CheckpointStore, ItemRecord};
use crate::shutdown::SharedShutdown;
use crate::source::EpisodeSource;
use crate::store::KvStore;
use crate::{ItemState, WorkItem};
use futures::stream;
use futures_util::StreamExt;
use metrics::counter;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, info_span, warn};

/// Callback invoked on every item state transition (used by the CLI to
/// drive its progress bar).
pub type TransitionObserver = Arc<dyn Fn(&str, ItemState) + Send + Sync>;

/// Per-batch options.
#[derive(Clone)]
pub struct BatchOptions {
    /// Batch identifier; the checkpoint file is keyed by this.
    pub batch_id: String,
    /// Ledger namespace isolating this source collection.
    pub namespace: String,
    /// Worker pool size.
    pub concurrency: usize,
    /// Processing attempts per item per run.
    pub max_attempts: u32,
    /// Item ids whose ledger entries are ignored this run.
    pub force_items: HashSet<String>,
    /// Reset previously failed items back to pending before dispatch.
    pub retry_failed: bool,
    /// Backoff bounds between attempts on one item.
    pub attempt_backoff: (Duration, Duration),
    /// Maximum total time one item may wait for a credential.
    pub max_acquire_wait: Duration,
}

impl BatchOptions {
    /// Options with defaults for `batch_id`/`namespace`.
    pub fn new(batch_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            namespace: namespace.into(),
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: MAX_ATTEMPTS,
            force_items: HashSet::new(),
            retry_failed: false,
            attempt_backoff: (
                Duration::from_millis(INITIAL_BACKOFF_MS),
                Duration::from_millis(MAX_BACKOFF_MS),
            ),
            max_acquire_wait: MAX_ACQUIRE_WAIT,
        }
    }

    /// Set the worker pool size.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the per-item attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Bypass ledger checks for the given item ids.
    pub fn with_force_items(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.force_items = ids.into_iter().collect();
        self
    }

    /// Re-dispatch previously failed items.
    pub fn with_retry_failed(mut self, retry_failed: bool) -> Self {
        self.retry_failed = retry_failed;
        self
    }

    /// Override attempt backoff bounds (tests use tiny delays).
    pub fn with_attempt_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.attempt_backoff = (initial, max);
        self
    }

    /// Override the maximum credential wait.
    pub fn with_max_acquire_wait(mut self, wait: Duration) -> Self {
        self.max_acquire_wait = wait;
        self
    }
}

/// End-of-run report.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    /// Batch identifier
    pub batch_id: String,
    /// Items tracked in the checkpoint
    pub total: usize,
    /// Items in `Succeeded` state after the run
    pub succeeded: usize,
    /// Items in `Failed` state after the run
    pub failed: usize,
    /// Items still pending (non-zero only after cancellation or halt)
    pub pending: usize,
    /// Items skipped this run because the ledger already had them
    pub skipped: usize,
    /// Whether the run stopped early on a shutdown request
    pub cancelled: bool,
    /// Whether the run halted because no credential freed up in time
    pub resource_exhausted: bool,
    /// Wall-clock duration of the run in seconds
    pub elapsed_secs: f64,
}

struct RunInner {
    checkpoint: Checkpoint,
    progress: BatchProgress,
    fatal: Option<OrchestratorError>,
    resource_exhausted: bool,
}

struct RunShared {
    inner: Mutex<RunInner>,
    checkpoints: CheckpointStore,
    pool: Arc<CredentialPool>,
    usage_store: Option<Arc<dyn KvStore>>,
    observer: Option<TransitionObserver>,
}

impl RunShared {
    /// Apply a state transition and persist the checkpoint (plus the
    /// credential usage snapshot) before returning.
    ///
    /// A persistence failure is recorded as the run's fatal error: silently
    /// continuing would break the crash-safety contract.
    fn transition(&self, item_id: &str, record: ItemRecord) -> bool {
        let mut inner = self.inner.lock().expect("run state lock poisoned");
        let state = record.state;
        inner.checkpoint.upsert(item_id, record);

        if let Err(e) = self.checkpoints.save(&inner.checkpoint) {
            error!(item_id = %item_id, error = %e, "failed to persist checkpoint");
            inner.fatal.get_or_insert(e.into());
            return false;
        }
        counter!("checkpoint_writes_total").increment(1);

        if let Some(store) = &self.usage_store {
            if let Err(e) = self.pool.snapshot_usage().save_to(store.as_ref()) {
                // Usage counters are advisory; losing them degrades quota
                // accuracy after restart but not correctness.
                warn!(error = %e, "failed to persist credential usage");
            }
        }
        drop(inner);

        if let Some(observer) = &self.observer {
            observer(item_id, state);
        }
        true
    }

    fn settle(&self, state: ItemState) {
        let mut inner = self.inner.lock().expect("run state lock poisoned");
        match state {
            ItemState::Succeeded => inner.progress.succeeded += 1,
            ItemState::Failed => inner.progress.failed += 1,
            _ => {}
        }
        if inner.progress.should_emit_update() {
            info!("{}", inner.progress.format_progress());
            inner.progress.mark_emitted();
        }
    }

    fn halt_resource_exhausted(&self) {
        let mut inner = self.inner.lock().expect("run state lock poisoned");
        inner.resource_exhausted = true;
    }

    fn should_stop(&self) -> bool {
        let inner = self.inner.lock().expect("run state lock poisoned");
        inner.fatal.is_some() || inner.resource_exhausted
    }
}

/// Top-level batch driver.
pub struct BatchOrchestrator {
    pool: Arc<CredentialPool>,
    ledger: ProgressLedger,
    checkpoints: CheckpointStore,
    options: BatchOptions,
    shutdown: Option<SharedShutdown>,
    tracker: ProgressTracker,
    usage_store: Option<Arc<dyn KvStore>>,
    observer: Option<TransitionObserver>,
}

impl BatchOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        pool: Arc<CredentialPool>,
        ledger: ProgressLedger,
        checkpoints: CheckpointStore,
        options: BatchOptions,
    ) -> Self {
        Self {
            pool,
            ledger,
            checkpoints,
            options,
            shutdown: crate::shutdown::get_global_shutdown(),
            tracker: ProgressTracker::default(),
            usage_store: None,
            observer: None,
        }
    }

    /// Attach a shared shutdown handle for cooperative cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Persist per-credential usage snapshots through the given store.
    pub fn with_usage_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.usage_store = Some(store);
        self
    }

    /// Override progress reporting cadence.
    pub fn with_progress_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Observe item state transitions (e.g. to drive a progress bar).
    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    /// Run the batch to completion (or cancellation/halt).
    ///
    /// Loads the checkpoint for this batch id if one exists, filters out
    /// work the ledger already recorded, dispatches the rest onto a bounded
    /// worker pool, and persists every state transition. A single item's
    /// permanent failure never aborts the batch; only durable-storage
    /// failures and credential starvation stop the run early.
    pub async fn run(
        &self,
        source: &dyn EpisodeSource,
        processor: &dyn EpisodeProcessor,
    ) -> Result<BatchSummary, OrchestratorError> {
        let span = info_span!(
            "batch_run",
            batch_id = %self.options.batch_id,
            namespace = %self.options.namespace
        );
        let _enter = span.enter();

        info!("starting batch run");
        let run_started = std::time::Instant::now();

        // Enumerate first: item ids are deterministic, so a resumed run
        // overlays checkpoint state onto the re-enumerated list.
        let mut items = source.enumerate().await?;

        let mut checkpoint = match self.checkpoints.load(&self.options.batch_id) {
            Some(checkpoint) => checkpoint,
            None => Checkpoint::new(&self.options.batch_id),
        };
        let interrupted = checkpoint.reset_interrupted();
        if interrupted > 0 {
            info!(count = interrupted, "re-queued items interrupted by a previous crash");
        }

        // Overlay prior state; operator-requested re-runs reset failures.
        for item in items.iter_mut() {
            if let Some(record) = checkpoint.record(&item.id) {
                item.state = record.state;
                item.attempts = record.attempts;
                item.last_error = record.last_error.clone();
            }
            if item.state == ItemState::Failed && self.options.retry_failed {
                info!(item_id = %item.id, "re-queuing failed item at operator request");
                item.state = ItemState::Pending;
                item.attempts = 0;
                item.last_error = None;
            }
        }

        // Ledger pre-filter: both idempotent resume and idempotent re-run
        // share this path.
        let mut skipped = 0usize;
        for item in items.iter_mut() {
            if item.state != ItemState::Pending {
                continue;
            }
            if self.options.force_items.contains(&item.id) {
                continue;
            }
            if self.ledger.is_done(&self.options.namespace, &item.id) {
                item.state = ItemState::Succeeded;
                skipped += 1;
                counter!("episodes_skipped_total").increment(1);
            }
        }
        if skipped > 0 {
            info!(count = skipped, "skipped episodes already recorded in ledger");
        }

        for item in &items {
            checkpoint.upsert(
                item.id.as_str(),
                ItemRecord {
                    state: item.state,
                    attempts: item.attempts,
                    last_error: item.last_error.clone(),
                },
            );
        }
        self.checkpoints.save(&checkpoint)?;

        let pending: Vec<WorkItem> = items
            .into_iter()
            .filter(|item| item.state == ItemState::Pending)
            .collect();

        info!(
            pending = pending.len(),
            skipped,
            total = checkpoint.items().len(),
            "dispatching batch"
        );

        let mut progress = self.tracker.create_progress(pending.len() + skipped);
        progress.skipped = skipped;

        let shared = Arc::new(RunShared {
            inner: Mutex::new(RunInner {
                checkpoint,
                progress,
                fatal: None,
                resource_exhausted: false,
            }),
            checkpoints: self.checkpoints.clone(),
            pool: Arc::clone(&self.pool),
            usage_store: self.usage_store.clone(),
            observer: self.observer.clone(),
        });

        let retry = RetryPolicy::new(Arc::clone(&self.pool))
            .with_max_attempts(self.options.max_attempts)
            .with_backoff(self.options.attempt_backoff.0, self.options.attempt_backoff.1)
            .with_max_acquire_wait(self.options.max_acquire_wait);
        let retry = match &self.shutdown {
            Some(shutdown) => retry.with_shutdown(shutdown.clone()),
            None => retry,
        };

        stream::iter(pending)
            .for_each_concurrent(self.options.concurrency, |item| {
                let shared = Arc::clone(&shared);
                let retry = retry.clone();
                async move {
                    self.process_one(item, &shared, &retry, processor).await;
                }
            })
            .await;

        let cancelled = self.shutdown_requested();
        let mut inner = shared.inner.lock().expect("run state lock poisoned");
        if let Some(fatal) = inner.fatal.take() {
            return Err(fatal);
        }

        // Final save so `updated_at` reflects the run end even when the
        // last transition happened a while ago.
        self.checkpoints.save(&inner.checkpoint)?;
        if let Some(store) = &self.usage_store {
            self.pool.snapshot_usage().save_to(store.as_ref())?;
        }

        let counts = inner.checkpoint.counts();
        let summary = BatchSummary {
            batch_id: self.options.batch_id.clone(),
            total: counts.total(),
            succeeded: counts.succeeded,
            failed: counts.failed,
            pending: counts.pending,
            skipped: inner.progress.skipped,
            cancelled,
            resource_exhausted: inner.resource_exhausted,
            elapsed_secs: run_started.elapsed().as_secs_f64(),
        };

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            pending = summary.pending,
            cancelled = summary.cancelled,
            "batch run finished"
        );
        Ok(summary)
    }

    async fn process_one(
        &self,
        item: WorkItem,
        shared: &Arc<RunShared>,
        retry: &RetryPolicy,
        processor: &dyn EpisodeProcessor,
    ) {
        // Stop dispatching on cancellation or halt; undispatched items stay
        // Pending in the checkpoint.
        if self.shutdown_requested() || shared.should_stop() {
            return;
        }

        if !shared.transition(
            &item.id,
            ItemRecord {
                state: ItemState::Running,
                attempts: item.attempts,
                last_error: item.last_error.clone(),
            },
        ) {
            return;
        }

        let attempt_counter = AtomicU32::new(0);
        let result = retry
            .execute(|credential| {
                attempt_counter.fetch_add(1, Ordering::SeqCst);
                let item = &item;
                let processor = &processor;
                async move { processor.process(item, &credential).await }
            })
            .await;
        let attempts = attempt_counter.load(Ordering::SeqCst);

        match result {
            Ok(()) => {
                if let Err(e) = self.ledger.mark_done(&self.options.namespace, &item.id) {
                    // The call succeeded but we cannot durably record it;
                    // leave the item un-succeeded so a re-run redoes it
                    // rather than silently losing the guarantee.
                    error!(item_id = %item.id, error = %e, "failed to record completion in ledger");
                    let mut inner = shared.inner.lock().expect("run state lock poisoned");
                    inner.fatal.get_or_insert(e.into());
                    return;
                }
                shared.transition(
                    &item.id,
                    ItemRecord {
                        state: ItemState::Succeeded,
                        attempts,
                        last_error: None,
                    },
                );
                shared.settle(ItemState::Succeeded);
                counter!("episodes_succeeded_total").increment(1);
            }
            Err(RetryError::Cancelled) => {
                // Put the item back; cancellation must leave the checkpoint
                // consistent with the ledger.
                shared.transition(
                    &item.id,
                    ItemRecord {
                        state: ItemState::Pending,
                        attempts: item.attempts,
                        last_error: item.last_error.clone(),
                    },
                );
            }
            Err(err) => {
                let exhausted = err.is_resource_exhaustion();
                warn!(item_id = %item.id, error = %err, "episode failed");
                shared.transition(
                    &item.id,
                    ItemRecord {
                        state: ItemState::Failed,
                        attempts,
                        last_error: Some(err.to_string()),
                    },
                );
                shared.settle(ItemState::Failed);
                counter!("episodes_failed_total").increment(1);

                if exhausted {
                    error!("credential pool starved; halting batch");
                    shared.halt_resource_exhausted();
                }
            }
        }
    }
}
