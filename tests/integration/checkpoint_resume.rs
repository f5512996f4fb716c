//! Integration tests for checkpoint persistence and resume semantics

use podcast_batch_processor::resume::{Checkpoint, CheckpointStore, ItemRecord};
use podcast_batch_processor::ItemState;

#[test]
fn test_checkpoint_roundtrip_preserves_item_state() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path());

    let mut cp = Checkpoint::new("backfill-1");
    cp.upsert(
        "a",
        ItemRecord {
            state: ItemState::Succeeded,
            attempts: 1,
            last_error: None,
        },
    );
    cp.upsert(
        "b",
        ItemRecord {
            state: ItemState::Failed,
            attempts: 3,
            last_error: Some("gave up after 3 attempts: gateway timeout (504)".to_string()),
        },
    );
    cp.upsert("c", ItemRecord::pending());
    store.save(&cp).unwrap();

    let loaded = store.load("backfill-1").unwrap();
    assert_eq!(loaded.record("a").unwrap().state, ItemState::Succeeded);
    assert_eq!(loaded.record("b").unwrap().attempts, 3);
    assert!(loaded
        .record("b")
        .unwrap()
        .last_error
        .as_deref()
        .unwrap()
        .contains("504"));
    assert_eq!(loaded.record("c").unwrap().state, ItemState::Pending);
}

#[test]
fn test_every_save_replaces_atomically() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path());

    let mut cp = Checkpoint::new("backfill-1");
    for i in 0..50 {
        cp.upsert(format!("item-{i}"), ItemRecord::pending());
        store.save(&cp).unwrap();

        // Every intermediate save must be a complete, parseable snapshot.
        let loaded = store.load("backfill-1").unwrap();
        assert_eq!(loaded.items().len(), i + 1);
    }

    // No stray temp files left behind by the write-temp-then-rename dance.
    let stray: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| !name.ends_with(".json") && !name.ends_with(".lock"))
        .collect();
    assert!(stray.is_empty(), "stray files: {stray:?}");
}

#[test]
fn test_corrupt_checkpoint_starts_fresh_batch() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path());

    let cp = Checkpoint::new("backfill-1");
    store.save(&cp).unwrap();

    // Simulate a torn write from a less careful writer.
    let path = store.path_for("backfill-1");
    let full = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, &full[..full.len() / 2]).unwrap();

    assert!(store.load("backfill-1").is_none());
}

#[test]
fn test_running_items_requeued_on_resume() {
    let mut cp = Checkpoint::new("backfill-1");
    cp.upsert(
        "interrupted",
        ItemRecord {
            state: ItemState::Running,
            attempts: 1,
            last_error: None,
        },
    );
    cp.upsert(
        "done",
        ItemRecord {
            state: ItemState::Succeeded,
            attempts: 1,
            last_error: None,
        },
    );
    cp.upsert(
        "failed",
        ItemRecord {
            state: ItemState::Failed,
            attempts: 2,
            last_error: Some("permanent failure: payload rejected (422)".to_string()),
        },
    );

    assert_eq!(cp.reset_interrupted(), 1);

    // Crash recovery touches only mid-flight items: failures are never
    // silently retried across restarts.
    assert_eq!(cp.record("interrupted").unwrap().state, ItemState::Pending);
    assert_eq!(cp.record("done").unwrap().state, ItemState::Succeeded);
    assert_eq!(cp.record("failed").unwrap().state, ItemState::Failed);
}

#[test]
fn test_checkpoints_are_isolated_per_batch() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path());

    let mut cp1 = Checkpoint::new("batch-1");
    cp1.upsert("a", ItemRecord::pending());
    store.save(&cp1).unwrap();

    let cp2 = Checkpoint::new("batch-2");
    store.save(&cp2).unwrap();

    assert_eq!(store.load("batch-1").unwrap().items().len(), 1);
    assert_eq!(store.load("batch-2").unwrap().items().len(), 0);
}
