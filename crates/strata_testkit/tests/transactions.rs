//! Conflict policies, snapshot isolation and commit-time validation.

use std::sync::Barrier;
use std::thread;
use strata_core::{ConflictType, CoreError, TxnState, DEFAULT_DATABASE};
use strata_testkit::prelude::*;

#[test]
fn create_database_with_ignore_is_idempotent() {
    let storage = TestStorage::new();
    commit_with(&storage, |txn| txn.create_database("db1", ConflictType::Ignore)).unwrap();
    commit_with(&storage, |txn| txn.create_database("db1", ConflictType::Ignore)).unwrap();

    assert_eq!(list_databases(&storage), vec!["db1", DEFAULT_DATABASE]);
    let chain_len = storage
        .catalog()
        .database_meta("db1")
        .map(|chain| chain.versions().len());
    assert_eq!(chain_len, Some(1));
}

#[test]
fn drop_missing_database_depends_on_policy() {
    let storage = TestStorage::new();
    let err = commit_with(&storage, |txn| txn.drop_database("dbX", ConflictType::Error)).unwrap_err();
    assert!(matches!(err, CoreError::DatabaseNotFound { .. }));
    commit_with(&storage, |txn| txn.drop_database("dbX", ConflictType::Ignore)).unwrap();
}

#[test]
fn duplicate_table_with_error_policy_fails() {
    let storage = TestStorage::new();
    commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
    })
    .unwrap();
    let err = commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
    })
    .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateTable { .. }));
}

#[test]
fn replace_policy_is_not_supported() {
    let storage = TestStorage::new();
    let txn = storage.begin_txn().unwrap();
    assert!(matches!(
        txn.create_database("db1", ConflictType::Replace),
        Err(CoreError::NotSupported { .. })
    ));
    storage.rollback(&txn).unwrap();
}

#[test]
fn reader_never_sees_later_commits() {
    let storage = TestStorage::new();
    commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
    })
    .unwrap();

    let reader = storage.begin_txn().unwrap();
    commit_with(&storage, |txn| {
        txn.create_database("db1", ConflictType::Error)?;
        txn.append(DEFAULT_DATABASE, "t1", int_block(&[1, 2, 3]))
    })
    .unwrap();

    assert_eq!(reader.list_databases(), vec![DEFAULT_DATABASE]);
    let table = reader.get_table_entry(DEFAULT_DATABASE, "t1").unwrap();
    assert_eq!(table.row_count(reader.begin_ts()), 0);
    assert!(reader.get_database("db1").is_err());
    storage.commit(&reader).unwrap();

    assert_eq!(table_row_count(&storage, DEFAULT_DATABASE, "t1"), 3);
}

#[test]
fn reader_snapshot_is_stable_while_writers_commit() {
    let storage = TestStorage::new();
    commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
    })
    .unwrap();
    commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(&[0]))).unwrap();

    let reader = storage.begin_txn().unwrap();
    let table = reader.get_table_entry(DEFAULT_DATABASE, "t1").unwrap();
    let ts = reader.begin_ts();

    thread::scope(|s| {
        s.spawn(|| {
            for i in 1..=50 {
                commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(&[i])))
                    .unwrap();
            }
        });
        for _ in 0..50 {
            assert_eq!(table.row_count(ts), 1);
            assert_eq!(
                reader
                    .read_block_column(DEFAULT_DATABASE, "t1", 0, 0, 0)
                    .unwrap()
                    .len(),
                1
            );
        }
    });

    assert_eq!(table.row_count(ts), 1);
    assert_eq!(table_row_count(&storage, DEFAULT_DATABASE, "t1"), 51);
}

#[test]
fn concurrent_create_of_one_table_commits_once() {
    let storage = TestStorage::new();
    let barrier = Barrier::new(2);
    let txns: Vec<_> = (0..2).map(|_| storage.begin_txn().unwrap()).collect();

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = txns
            .iter()
            .map(|txn| {
                let storage = &*storage;
                let barrier = &barrier;
                s.spawn(move || {
                    txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
                        .unwrap();
                    barrier.wait();
                    storage.commit(txn)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CoreError::TxnConflict { .. }))));
    for txn in &txns {
        assert!(matches!(txn.state(), TxnState::Committed | TxnState::RolledBack));
    }
}

#[test]
fn drop_table_conflicts_with_concurrent_append() {
    let storage = TestStorage::new();
    commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
    })
    .unwrap();

    let appender = storage.begin_txn().unwrap();
    appender
        .append(DEFAULT_DATABASE, "t1", int_block(&[1]))
        .unwrap();
    commit_with(&storage, |txn| {
        txn.drop_table_by_name(DEFAULT_DATABASE, "t1", ConflictType::Error)
    })
    .unwrap();

    assert!(matches!(
        storage.commit(&appender),
        Err(CoreError::TxnConflict { .. })
    ));
    assert_eq!(storage.stats().conflicts(), 1);
}

#[test]
fn concurrent_appends_all_land() {
    let storage = TestStorage::new();
    commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
    })
    .unwrap();

    let config = StressConfig {
        threads: 8,
        txns_per_thread: 20,
        rows_per_txn: 3,
    };
    let result = stress_concurrent_appends(&storage, DEFAULT_DATABASE, "t1", &config);
    assert_eq!(result.committed, 160);
    assert_eq!(table_row_count(&storage, DEFAULT_DATABASE, "t1"), 480);
}
