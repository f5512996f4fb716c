//! End-to-end orchestrator tests with fake collaborators

use async_trait::async_trait;
use podcast_batch_processor::credentials::{ApiCredential, CredentialPool};
use podcast_batch_processor::derive_item_id;
use podcast_batch_processor::ledger::ProgressLedger;
use podcast_batch_processor::orchestrator::{BatchOptions, BatchOrchestrator};
use podcast_batch_processor::processor::{EpisodeProcessor, ProcessError};
use podcast_batch_processor::resume::CheckpointStore;
use podcast_batch_processor::shutdown::{SharedShutdown, ShutdownCoordinator};
use podcast_batch_processor::source::{EpisodeSource, SourceError};
use podcast_batch_processor::store::FileKvStore;
use podcast_batch_processor::{Episode, ItemState, WorkItem};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const FEED: &str = "acme-weekly";

struct FakeSource {
    episodes: Vec<Episode>,
}

impl FakeSource {
    fn with_episodes(n: usize) -> Self {
        let episodes = (0..n)
            .map(|i| Episode {
                feed: FEED.to_string(),
                title: format!("Ep {i}"),
                published_at: 1_700_000_000_000 + i as i64 * 86_400_000,
                audio_url: format!("https://cdn.example.com/{i}.mp3"),
            })
            .collect();
        Self { episodes }
    }
}

#[async_trait]
impl EpisodeSource for FakeSource {
    async fn enumerate(&self) -> Result<Vec<WorkItem>, SourceError> {
        Ok(self
            .episodes
            .iter()
            .cloned()
            .map(WorkItem::from_episode)
            .collect())
    }

    fn feed_name(&self) -> &str {
        FEED
    }
}

fn item_id(i: usize) -> String {
    derive_item_id(
        FEED,
        &format!("Ep {i}"),
        1_700_000_000_000 + i as i64 * 86_400_000,
    )
}

type Behavior = dyn Fn(&WorkItem, u32) -> Result<(), ProcessError> + Send + Sync;

/// Processing callback with a per-item call counter, per the idempotency
/// verification strategy: no item may ever be processed twice once it
/// succeeded.
struct FakeProcessor {
    calls: Mutex<HashMap<String, u32>>,
    behavior: Box<Behavior>,
}

impl FakeProcessor {
    fn new(
        behavior: impl Fn(&WorkItem, u32) -> Result<(), ProcessError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            behavior: Box::new(behavior),
        }
    }

    fn always_succeed() -> Self {
        Self::new(|_, _| Ok(()))
    }

    fn calls_for(&self, id: &str) -> u32 {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl EpisodeProcessor for FakeProcessor {
    async fn process(
        &self,
        item: &WorkItem,
        _credential: &ApiCredential,
    ) -> Result<(), ProcessError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(item.id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        (self.behavior)(item, call_number)
    }
}

fn pool(keys: usize) -> Arc<CredentialPool> {
    let keys = (0..keys)
        .map(|i| {
            (
                ApiCredential::new(format!("key-{i}"), format!("secret-{i}")),
                1000,
                100_000,
            )
        })
        .collect();
    Arc::new(CredentialPool::new(keys).unwrap())
}

fn orchestrator(
    state_dir: &Path,
    batch_id: &str,
    shutdown: SharedShutdown,
) -> (BatchOrchestrator, ProgressLedger) {
    let kv = Arc::new(FileKvStore::new(state_dir.join("kv")).unwrap());
    let ledger = ProgressLedger::new(kv.clone());
    let options = BatchOptions::new(batch_id, FEED)
        .with_attempt_backoff(Duration::from_millis(1), Duration::from_millis(2))
        .with_max_acquire_wait(Duration::from_secs(2));
    let orchestrator = BatchOrchestrator::new(
        pool(2),
        ledger.clone(),
        CheckpointStore::new(state_dir.join("checkpoints")),
        options,
    )
    .with_shutdown(shutdown)
    .with_usage_store(kv);
    (orchestrator, ledger)
}

fn orchestrator_with(
    state_dir: &Path,
    batch_id: &str,
    tweak: impl FnOnce(BatchOptions) -> BatchOptions,
) -> (BatchOrchestrator, ProgressLedger) {
    let kv = Arc::new(FileKvStore::new(state_dir.join("kv")).unwrap());
    let ledger = ProgressLedger::new(kv.clone());
    let options = tweak(
        BatchOptions::new(batch_id, FEED)
            .with_attempt_backoff(Duration::from_millis(1), Duration::from_millis(2))
            .with_max_acquire_wait(Duration::from_secs(2)),
    );
    let orchestrator = BatchOrchestrator::new(
        pool(2),
        ledger.clone(),
        CheckpointStore::new(state_dir.join("checkpoints")),
        options,
    )
    .with_shutdown(ShutdownCoordinator::shared())
    .with_usage_store(kv);
    (orchestrator, ledger)
}

#[tokio::test]
async fn test_fresh_batch_processes_everything_once() {
    let dir = tempfile::TempDir::new().unwrap();
    let (orchestrator, ledger) =
        orchestrator(dir.path(), "batch-1", ShutdownCoordinator::shared());
    let source = FakeSource::with_episodes(5);
    let processor = FakeProcessor::always_succeed();

    let summary = orchestrator.run(&source, &processor).await.unwrap();

    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);
    assert!(!summary.cancelled);

    assert_eq!(processor.total_calls(), 5);
    for i in 0..5 {
        assert_eq!(processor.calls_for(&item_id(i)), 1);
        assert!(ledger.is_done(FEED, &item_id(i)));
    }
}

#[tokio::test]
async fn test_preexisting_ledger_entries_not_dispatched() {
    let dir = tempfile::TempDir::new().unwrap();
    let (orchestrator, ledger) =
        orchestrator(dir.path(), "batch-1", ShutdownCoordinator::shared());

    // 3 of 8 items already completed in some earlier batch.
    for i in 0..3 {
        ledger.mark_done(FEED, &item_id(i)).unwrap();
    }

    let source = FakeSource::with_episodes(8);
    let processor = FakeProcessor::always_succeed();
    let summary = orchestrator.run(&source, &processor).await.unwrap();

    assert_eq!(summary.succeeded, 8);
    assert_eq!(summary.skipped, 3);
    assert_eq!(processor.total_calls(), 5);
    for i in 0..3 {
        assert_eq!(processor.calls_for(&item_id(i)), 0, "item {i} re-dispatched");
    }
}

#[tokio::test]
async fn test_completed_batch_rerun_dispatches_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = FakeSource::with_episodes(5);

    let (first, _) = orchestrator(dir.path(), "batch-1", ShutdownCoordinator::shared());
    let processor = FakeProcessor::always_succeed();
    first.run(&source, &processor).await.unwrap();
    assert_eq!(processor.total_calls(), 5);

    // Same batch id, fresh orchestrator: everything is already settled.
    let (second, _) = orchestrator(dir.path(), "batch-1", ShutdownCoordinator::shared());
    let processor2 = FakeProcessor::always_succeed();
    let summary = second.run(&source, &processor2).await.unwrap();

    assert_eq!(summary.succeeded, 5);
    assert_eq!(processor2.total_calls(), 0);
}

#[tokio::test]
async fn test_interrupted_run_resumes_exactly_once_per_item() {
    let dir = tempfile::TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();

    let kv = Arc::new(FileKvStore::new(dir.path().join("kv")).unwrap());
    let options = BatchOptions::new("batch-1", FEED)
        .with_concurrency(1)
        .with_attempt_backoff(Duration::from_millis(1), Duration::from_millis(2))
        .with_max_acquire_wait(Duration::from_secs(2));
    let first = BatchOrchestrator::new(
        pool(2),
        ProgressLedger::new(kv.clone()),
        CheckpointStore::new(dir.path().join("checkpoints")),
        options,
    )
    .with_shutdown(shutdown.clone())
    .with_usage_store(kv);

    // The "crash": shutdown fires from inside the third successful call.
    let successes = Arc::new(Mutex::new(0u32));
    let successes_in = successes.clone();
    let shutdown_in = shutdown.clone();
    let processor = FakeProcessor::new(move |_, _| {
        let mut successes = successes_in.lock().unwrap();
        *successes += 1;
        if *successes == 3 {
            shutdown_in.request_shutdown();
        }
        Ok(())
    });

    let source = FakeSource::with_episodes(10);
    let summary = first.run(&source, &processor).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.pending, 7);
    assert_eq!(processor.total_calls(), 3);

    // Restart with the same batch id; only the remaining items run.
    let (second, ledger) = orchestrator(dir.path(), "batch-1", ShutdownCoordinator::shared());
    let processor2 = FakeProcessor::always_succeed();
    let resumed = second.run(&source, &processor2).await.unwrap();

    assert!(!resumed.cancelled);
    assert_eq!(resumed.succeeded, 10);
    assert_eq!(resumed.pending, 0);
    assert_eq!(processor2.total_calls(), 7);

    // Across both runs, no item was processed twice.
    for i in 0..10 {
        let total = processor.calls_for(&item_id(i)) + processor2.calls_for(&item_id(i));
        assert_eq!(total, 1, "item {i} processed {total} times");
        assert!(ledger.is_done(FEED, &item_id(i)));
    }
}

#[tokio::test]
async fn test_permanent_failure_does_not_abort_batch() {
    let dir = tempfile::TempDir::new().unwrap();
    let (orchestrator, ledger) =
        orchestrator(dir.path(), "batch-1", ShutdownCoordinator::shared());

    let bad_id = item_id(2);
    let bad_id_in = bad_id.clone();
    let processor = FakeProcessor::new(move |item, _| {
        if item.id == bad_id_in {
            Err(ProcessError::permanent("payload rejected (422)"))
        } else {
            Ok(())
        }
    });

    let source = FakeSource::with_episodes(4);
    let summary = orchestrator.run(&source, &processor).await.unwrap();

    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 1);
    // Permanent means exactly one call, no retries.
    assert_eq!(processor.calls_for(&bad_id), 1);
    assert!(!ledger.is_done(FEED, &bad_id));

    // The failure is recorded for inspection.
    let store = CheckpointStore::new(dir.path().join("checkpoints"));
    let checkpoint = store.load("batch-1").unwrap();
    let record = checkpoint.record(&bad_id).unwrap();
    assert_eq!(record.state, ItemState::Failed);
    assert!(record.last_error.as_deref().unwrap().contains("422"));
}

#[tokio::test]
async fn test_failed_items_rerun_only_on_request() {
    let dir = tempfile::TempDir::new().unwrap();
    let bad_id = item_id(1);
    let source = FakeSource::with_episodes(3);

    // First run: one item fails permanently.
    let (first, _) = orchestrator(dir.path(), "batch-1", ShutdownCoordinator::shared());
    let bad_id_in = bad_id.clone();
    let processor = FakeProcessor::new(move |item, _| {
        if item.id == bad_id_in {
            Err(ProcessError::permanent("payload rejected (422)"))
        } else {
            Ok(())
        }
    });
    first.run(&source, &processor).await.unwrap();

    // A plain re-run leaves the failure alone.
    let (second, _) = orchestrator(dir.path(), "batch-1", ShutdownCoordinator::shared());
    let processor2 = FakeProcessor::always_succeed();
    let summary = second.run(&source, &processor2).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(processor2.total_calls(), 0);

    // With --retry-failed the failed item (and only it) is dispatched.
    let (third, _) =
        orchestrator_with(dir.path(), "batch-1", |o| o.with_retry_failed(true));
    let processor3 = FakeProcessor::always_succeed();
    let summary = third.run(&source, &processor3).await.unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(processor3.total_calls(), 1);
    assert_eq!(processor3.calls_for(&bad_id), 1);
}

#[tokio::test]
async fn test_force_item_bypasses_ledger() {
    let dir = tempfile::TempDir::new().unwrap();
    let forced = item_id(0);

    let (first, ledger) = orchestrator(dir.path(), "batch-1", ShutdownCoordinator::shared());
    ledger.mark_done(FEED, &forced).unwrap();
    ledger.mark_done(FEED, &item_id(1)).unwrap();

    let (orchestrator, _) = {
        drop(first);
        let forced = forced.clone();
        orchestrator_with(dir.path(), "batch-1", move |o| o.with_force_items([forced]))
    };

    let source = FakeSource::with_episodes(2);
    let processor = FakeProcessor::always_succeed();
    let summary = orchestrator.run(&source, &processor).await.unwrap();

    // The forced item runs despite its ledger entry; the other is skipped.
    assert_eq!(processor.calls_for(&forced), 1);
    assert_eq!(processor.calls_for(&item_id(1)), 0);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn test_transient_failures_retried_within_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let (orchestrator, _) = orchestrator(dir.path(), "batch-1", ShutdownCoordinator::shared());

    let flaky = item_id(0);
    let flaky_in = flaky.clone();
    let processor = FakeProcessor::new(move |item, call_number| {
        if item.id == flaky_in && call_number < 3 {
            Err(ProcessError::transient("connection reset"))
        } else {
            Ok(())
        }
    });

    let source = FakeSource::with_episodes(2);
    let summary = orchestrator.run(&source, &processor).await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(processor.calls_for(&flaky), 3);

    let store = CheckpointStore::new(dir.path().join("checkpoints"));
    let checkpoint = store.load("batch-1").unwrap();
    assert_eq!(checkpoint.record(&flaky).unwrap().attempts, 3);
}
