//! Recovery from a WAL damaged by a crash or by the disk.

use proptest::prelude::*;
use strata_core::{Config, ConflictType, CoreError, Storage, DEFAULT_DATABASE};
use strata_testkit::prelude::*;

fn storage_with_table() -> TestStorage {
    let storage = TestStorage::new();
    commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
    })
    .unwrap();
    storage
}

#[test]
fn torn_last_record_loses_only_that_commit() {
    let mut storage = storage_with_table();
    commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(&[1, 2]))).unwrap();
    commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(&[3]))).unwrap();
    storage.close();

    truncate_wal_tail(storage.path(), 5);
    storage.open();

    assert_eq!(table_row_count(&storage, DEFAULT_DATABASE, "t1"), 2);

    // The log accepts new commits after the torn tail is cut away.
    commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(&[4]))).unwrap();
    storage.reopen();
    assert_eq!(table_row_count(&storage, DEFAULT_DATABASE, "t1"), 3);
}

#[test]
fn checksum_mismatch_refuses_to_open() {
    let mut storage = storage_with_table();
    storage.close();

    // Inside the payload of the first record.
    flip_wal_byte(storage.path(), 13);
    assert!(matches!(
        storage.try_open(),
        Err(CoreError::WalCorruption { .. })
    ));
}

#[test]
fn commit_that_failed_to_sync_stays_lost_after_restart() {
    let provider = SyncFailingProvider::new();
    let config = Config::default()
        .sync_on_commit(true)
        .checkpoint_interval(None);
    let storage = Storage::open_with_provider(provider.shared(), config.clone()).unwrap();

    provider.fail_syncs(true);
    let result = commit_with(&storage, |txn| txn.create_database("ghost", ConflictType::Error));
    assert!(result.is_err());
    assert_eq!(list_databases(&storage), vec![DEFAULT_DATABASE]);

    // The log refuses appends until it is reopened.
    provider.fail_syncs(false);
    assert!(commit_with(&storage, |txn| txn.create_database("db1", ConflictType::Error)).is_err());
    storage.close().unwrap();

    let storage = Storage::open_with_provider(provider.shared(), config).unwrap();
    assert_eq!(list_databases(&storage), vec![DEFAULT_DATABASE]);
    commit_with(&storage, |txn| txn.create_database("db1", ConflictType::Error)).unwrap();
    assert_eq!(list_databases(&storage), vec!["db1", DEFAULT_DATABASE]);
}

#[test]
fn torn_tail_after_checkpoint_keeps_checkpointed_state() {
    let mut storage = storage_with_table();
    commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(&[1, 2, 3]))).unwrap();
    storage.checkpoint(false).unwrap();
    commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(&[4]))).unwrap();
    storage.close();

    truncate_wal_tail(storage.path(), 1);
    storage.open();
    assert_eq!(table_row_count(&storage, DEFAULT_DATABASE, "t1"), 3);
    assert_eq!(storage.stats().wal_entries_replayed(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_cut_inside_the_last_record_recovers_the_prefix(
        batches in append_batches_strategy(6, 8),
        cut_fraction in 0.0f64..1.0,
    ) {
        let mut storage = storage_with_table();
        let (last, earlier) = batches.split_last().unwrap();
        for batch in earlier {
            commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(batch))).unwrap();
        }
        let before_last = wal_size(storage.path());
        commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(last))).unwrap();
        let record_len = wal_size(storage.path()) - before_last;
        storage.close();

        let cut = 1 + ((record_len - 1) as f64 * cut_fraction) as u64;
        truncate_wal_tail(storage.path(), cut);
        storage.open();

        let expected: usize = earlier.iter().map(Vec::len).sum();
        prop_assert_eq!(table_row_count(&storage, DEFAULT_DATABASE, "t1"), expected as u64);
        prop_assert_eq!(wal_size(storage.path()), before_last);
    }
}
