//! Integration tests for the progress ledger

use podcast_batch_processor::ledger::ProgressLedger;
use podcast_batch_processor::store::{FileKvStore, KvStore};
use std::sync::Arc;

fn ledger() -> (tempfile::TempDir, ProgressLedger) {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FileKvStore::new(dir.path().join("kv")).unwrap());
    (dir, ProgressLedger::new(store))
}

#[test]
fn test_is_done_exactly_mirrors_mark_done() {
    let (_dir, ledger) = ledger();

    let ids: Vec<String> = (0..20).map(|i| format!("item-{i}")).collect();
    for id in ids.iter().take(10) {
        ledger.mark_done("feed-a", id).unwrap();
    }

    for (i, id) in ids.iter().enumerate() {
        assert_eq!(ledger.is_done("feed-a", id), i < 10, "item {i}");
    }
}

#[test]
fn test_ledger_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path().join("kv");

    {
        let store = Arc::new(FileKvStore::new(&root).unwrap());
        let ledger = ProgressLedger::new(store);
        ledger.mark_done("feed-a", "item-1").unwrap();
    }

    // A fresh process sees the same durable state.
    let store = Arc::new(FileKvStore::new(&root).unwrap());
    let ledger = ProgressLedger::new(store);
    assert!(ledger.is_done("feed-a", "item-1"));
    assert!(!ledger.is_done("feed-a", "item-2"));
}

#[test]
fn test_concurrent_writers_do_not_corrupt_records() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FileKvStore::new(dir.path().join("kv")).unwrap());
    let ledger = ProgressLedger::new(store);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let ledger = ledger.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    ledger
                        .mark_done("stress", &format!("w{worker}-item-{i}"))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for worker in 0..8 {
        for i in 0..25 {
            assert!(
                ledger.is_done("stress", &format!("w{worker}-item-{i}")),
                "worker {worker} item {i} lost"
            );
        }
    }
    assert_eq!(ledger.count("stress").unwrap(), 200);
}

#[test]
fn test_corrupt_storage_fails_open() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FileKvStore::new(dir.path().join("kv")).unwrap());

    // Garbage where a record should be must read as "not done" so the item
    // is re-processed rather than silently skipped.
    store.put("ledger/feed-a/item-1", b"\x00\xffgarbage").unwrap();

    let ledger = ProgressLedger::new(store);
    assert!(!ledger.is_done("feed-a", "item-1"));
}

#[test]
fn test_mark_done_is_idempotent() {
    let (_dir, ledger) = ledger();
    ledger.mark_done("feed-a", "item-1").unwrap();
    ledger.mark_done("feed-a", "item-1").unwrap();
    assert!(ledger.is_done("feed-a", "item-1"));
    assert_eq!(ledger.count("feed-a").unwrap(), 1);
}
