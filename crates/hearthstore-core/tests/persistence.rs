//! Integration tests: change tracking, timed flushing and recovery
//! through the public `TimedPersistence` handle.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use hearthstore_core::format::{decode_record, RecordHeader, RECORD_HEADER_SIZE};
use hearthstore_core::{
    AbortReason, ChangeKind, Config, DurableStore, PersistencePolicy, SkipReason, StoreError,
    TimedPersistence, Volume,
};

use common::{memory_persistence, reopen, TestTree};

/// Every (id, payload) record physically present in a segment.
fn records_in(bytes: &[u8], segment: u64) -> Vec<(u64, Vec<u8>)> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset + RECORD_HEADER_SIZE <= bytes.len() {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        header.copy_from_slice(&bytes[offset..offset + RECORD_HEADER_SIZE]);
        let len = RecordHeader::from_bytes(&header).record_len() as usize;
        let record = decode_record(&bytes[offset..offset + len], segment, offset as u64).unwrap();
        records.push(record);
        offset += len;
    }
    records
}

fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ---------------------------------------------------------------------------
// Coalescing
// ---------------------------------------------------------------------------

#[test]
fn test_repeated_modifications_write_one_record() {
    let (persistence, tree, volume) = memory_persistence(&Config::default());

    tree.set(1, "v1");
    persistence.store(1, ChangeKind::Created);
    tree.set(1, "v2");
    persistence.store(1, ChangeKind::Modified);
    tree.set(1, "v3");
    persistence.store(1, ChangeKind::Modified);

    let outcome = persistence.tick();
    assert_eq!(outcome.report().unwrap().written, 1);

    let segment = volume.segments().unwrap()[0];
    let records = records_in(&volume.segment_bytes(segment).unwrap(), segment);
    assert_eq!(records, vec![(1, b"v3".to_vec())]);
    assert_eq!(persistence.read_latest(1).unwrap(), Some(b"v3".to_vec()));
}

#[test]
fn test_created_then_deleted_never_reaches_store() {
    let (persistence, tree, volume) = memory_persistence(&Config::default());

    tree.set(1, "other");
    persistence.store(1, ChangeKind::Created);
    tree.set(2, "short lived");
    persistence.store(2, ChangeKind::Created);
    tree.delete(2);
    persistence.store(2, ChangeKind::Deleted);

    persistence.tick();

    let segment = volume.segments().unwrap()[0];
    let records = records_in(&volume.segment_bytes(segment).unwrap(), segment);
    assert!(records.iter().all(|(id, _)| *id != 2), "id 2 written: {:?}", records);
    assert_eq!(persistence.read_latest(2).unwrap(), None);
}

#[test]
fn test_delete_after_flush_removes_entry() {
    let config = Config::default();
    let (persistence, tree, volume) = memory_persistence(&config);

    tree.set(7, "lamp");
    persistence.store(7, ChangeKind::Created);
    persistence.tick();
    assert!(persistence.read_latest(7).unwrap().is_some());

    tree.delete(7);
    persistence.store(7, ChangeKind::Deleted);
    let outcome = persistence.tick();
    assert_eq!(outcome.report().unwrap().removed, 1);

    drop(persistence);
    assert!(!reopen(&volume, &config).contains(7));
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[test]
fn test_transaction_batches_changes_into_one_cycle() {
    let (persistence, tree, volume) = memory_persistence(&Config::default());

    persistence.start_transaction(0);
    tree.set(3, "three");
    persistence.store(3, ChangeKind::Created);
    tree.set(4, "four");
    persistence.store(4, ChangeKind::Created);

    assert_eq!(persistence.tick().skip_reason(), Some(SkipReason::InTransaction));
    assert_eq!(persistence.read_latest(3).unwrap(), None);
    assert_eq!(volume.directory_writes(), 0);

    persistence.finish_transaction(0);
    let outcome = persistence.tick();
    assert_eq!(outcome.report().unwrap().written, 2);
    assert_eq!(volume.directory_writes(), 1);
    assert_eq!(persistence.read_latest(3).unwrap(), Some(b"three".to_vec()));
    assert_eq!(persistence.read_latest(4).unwrap(), Some(b"four".to_vec()));
}

#[test]
fn test_scheduled_ticks_respect_transaction() {
    let config = Config::default().with_flush_period(Duration::from_millis(10));
    let (persistence, tree, _volume) = memory_persistence(&config);
    persistence.start_storage().unwrap();

    persistence.start_transaction(42);
    tree.set(5, "held back");
    persistence.store(5, ChangeKind::Created);

    assert!(wait_for(Duration::from_secs(5), || persistence.stats().skipped_transaction >= 3));
    assert_eq!(persistence.read_latest(5).unwrap(), None);
    assert_eq!(persistence.tracker().pending_count(), 1);

    persistence.finish_transaction(42);
    assert!(wait_for(Duration::from_secs(5), || persistence.read_latest(5).unwrap().is_some()));
    persistence.stop_storage();
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[test]
fn test_io_failure_aborts_cycle_and_drops_rest() {
    let config = Config::default();
    let (persistence, tree, volume) = memory_persistence(&config);

    for id in 1..=5u64 {
        tree.set(id, format!("resource {}", id));
        persistence.store(id, ChangeKind::Created);
    }

    volume.fail_after(2);
    let outcome = persistence.tick();
    let report = outcome.report().unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(report.lost, 3);
    assert!(matches!(report.aborted, Some(AbortReason::Io(StoreError::Io { .. }))));
    volume.clear_failure();

    // Drained changes are not re-queued
    assert_eq!(persistence.tracker().pending_count(), 0);
    assert_eq!(persistence.tick().skip_reason(), Some(SkipReason::NothingPending));

    assert!(persistence.read_latest(1).unwrap().is_some());
    assert!(persistence.read_latest(2).unwrap().is_some());
    for id in 3..=5u64 {
        assert_eq!(persistence.read_latest(id).unwrap(), None);
    }
    assert_eq!(persistence.stats().io_failures, 1);

    // Records written before the failure survive a restart
    drop(persistence);
    assert_eq!(reopen(&volume, &config).ids(), vec![1, 2]);
}

#[test]
fn test_lost_changes_recover_when_reported_again() {
    let (persistence, tree, volume) = memory_persistence(&Config::default());
    tree.set(1, "first");
    persistence.store(1, ChangeKind::Created);

    volume.fail_after(0);
    persistence.tick();
    volume.clear_failure();
    assert_eq!(persistence.read_latest(1).unwrap(), None);

    persistence.persist_all();
    persistence.tick();
    assert_eq!(persistence.read_latest(1).unwrap(), Some(b"first".to_vec()));
}

#[test]
fn test_serialization_failure_does_not_abort() {
    let (persistence, tree, _volume) = memory_persistence(&Config::default());
    for id in 1..=4u64 {
        tree.set(id, "ok");
        persistence.store(id, ChangeKind::Modified);
    }
    tree.break_resource(2);

    let outcome = persistence.tick();
    let report = outcome.report().unwrap();
    assert!(report.aborted.is_none());
    assert_eq!((report.written, report.skipped, report.lost), (3, 1, 0));
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[test]
fn test_cycles_never_overlap() {
    let config = Config::default().with_flush_period(Duration::from_millis(1));
    let (persistence, tree, _volume) = memory_persistence(&config);
    let persistence = Arc::new(persistence);
    tree.slow_down(Duration::from_millis(2));
    persistence.start_storage().unwrap();

    let tickers: Vec<_> = (0..4)
        .map(|_| {
            let persistence = Arc::clone(&persistence);
            thread::spawn(move || {
                for _ in 0..20 {
                    persistence.tick();
                }
            })
        })
        .collect();

    for round in 0..20u64 {
        for id in 0..5u64 {
            tree.set(id, format!("round {}", round));
            persistence.store(id, ChangeKind::Modified);
        }
        thread::sleep(Duration::from_millis(1));
    }
    for ticker in tickers {
        ticker.join().unwrap();
    }
    persistence.stop_storage();

    assert_eq!(tree.max_in_flight(), 1);
}

#[test]
fn test_stop_storage_halts_background_flush() {
    let config = Config::default().with_flush_period(Duration::from_millis(10));
    let (persistence, tree, _volume) = memory_persistence(&config);
    persistence.start_storage().unwrap();
    assert!(persistence.is_storage_running());
    persistence.stop_storage();
    assert!(!persistence.is_storage_running());

    tree.set(9, "late");
    persistence.store(9, ChangeKind::Created);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(persistence.read_latest(9).unwrap(), None);
    assert_eq!(persistence.tracker().pending_count(), 1);
}

#[test]
fn test_stop_during_cycle_drops_remaining_changes() {
    let config = Config::default();
    let (persistence, tree, volume) = memory_persistence(&config);
    let persistence = Arc::new(persistence);
    for id in 0..10u64 {
        tree.set(id, format!("sensor {}", id));
        persistence.store(id, ChangeKind::Created);
    }
    tree.slow_down(Duration::from_millis(20));

    let cycle = {
        let persistence = Arc::clone(&persistence);
        thread::spawn(move || persistence.tick())
    };
    assert!(wait_for(Duration::from_secs(5), || tree.serialize_calls() >= 2));
    persistence.stop_storage();

    let outcome = cycle.join().unwrap();
    let report = outcome.report().unwrap();
    assert!(matches!(report.aborted, Some(AbortReason::Stopped)));
    assert_eq!(report.written + report.lost, 10);
    assert!(report.written >= 2);
    assert!(report.lost > 0);
    assert_eq!(persistence.tracker().pending_count(), 0);
    assert_eq!(persistence.tick().skip_reason(), Some(SkipReason::Stopped));

    // Exactly the records written before the stop survive a restart
    drop(persistence);
    let written = report.written as u64;
    assert_eq!(reopen(&volume, &config).ids(), (0..written).collect::<Vec<_>>());
}

#[test]
fn test_double_start_is_rejected() {
    let (persistence, _tree, _volume) = memory_persistence(&Config::default());
    persistence.start_storage().unwrap();
    assert!(matches!(persistence.start_storage(), Err(StoreError::AlreadyStarted)));
    persistence.stop_storage();
}

// ---------------------------------------------------------------------------
// On-disk store
// ---------------------------------------------------------------------------

#[test]
fn test_file_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = Config::default();
    let tree = TestTree::new();

    {
        let persistence = TimedPersistence::open(dir.path(), tree.clone(), &config).unwrap();
        for id in 0..50u64 {
            tree.set(id, format!("node {}", id));
            persistence.store(id, ChangeKind::Created);
        }
        persistence.tick();
        for id in (0..50u64).step_by(2) {
            tree.delete(id);
            persistence.store(id, ChangeKind::Deleted);
        }
        persistence.tick();
    }

    let store = DurableStore::open_dir(dir.path(), &config).unwrap();
    assert_eq!(store.len(), 25);
    for id in 0..50u64 {
        let expected = (id % 2 == 1).then(|| format!("node {}", id).into_bytes());
        assert_eq!(store.read_latest(id).unwrap(), expected);
    }
    assert_eq!(store.verify().unwrap().records_checked, 25);
}

#[test]
fn test_compaction_through_flush_on_disk() {
    let dir = TempDir::new().unwrap();
    let config = Config::default().with_compaction_trigger_ratio(0.5).with_max_file_size(4096);
    let tree = TestTree::new();
    let persistence = TimedPersistence::open(dir.path(), tree.clone(), &config).unwrap();

    for round in 0..10u32 {
        for id in 0..20u64 {
            tree.set(id, format!("round {:02} value {:04}", round, id));
            persistence.store(id, ChangeKind::Modified);
        }
        persistence.tick();
    }

    assert!(persistence.stats().compactions >= 1);
    for id in 0..20u64 {
        assert_eq!(persistence.read_latest(id).unwrap(), tree.value(id));
    }
    persistence.with_store(|store| assert!(store.stale_ratio() < 0.7));
}
