//! Restart scenarios: the catalog rebuilt from checkpoint plus WAL must match
//! the catalog before the restart.

use std::sync::Arc;
use strata_codec::Value;
use strata_core::catalog::VersionNode;
use strata_core::{
    Config, ConflictType, EntryType, ForceCheckpointTask, IndexBase, IndexDef, Storage,
    DEFAULT_DATABASE,
};
use strata_testkit::prelude::*;

fn force_checkpoint(storage: &Storage) -> u64 {
    let txn = storage.begin_txn().unwrap();
    let task = Arc::new(ForceCheckpointTask::new(
        Arc::clone(storage.checkpointer()),
        Arc::clone(storage.txn_manager()),
        Arc::clone(&txn),
        false,
    ));
    storage.bg_processor().submit(task.clone()).unwrap();
    let info = task.wait().unwrap();
    storage.commit(&txn).unwrap();
    info.checkpoint_ts.as_u64()
}

#[test]
fn databases_survive_checkpoint_and_restart() {
    let mut storage = TestStorage::new();
    for name in ["db1", "db2", "db3", "db4"] {
        commit_with(&storage, |txn| txn.create_database(name, ConflictType::Ignore)).unwrap();
    }
    force_checkpoint(&storage);
    commit_with(&storage, |txn| txn.create_database("db5", ConflictType::Ignore)).unwrap();
    commit_with(&storage, |txn| txn.drop_database("db1", ConflictType::Error)).unwrap();

    let before = list_databases(&storage);
    storage.reopen();

    assert_eq!(list_databases(&storage), before);
    assert_eq!(
        list_databases(&storage),
        vec!["db2", "db3", "db4", "db5", DEFAULT_DATABASE]
    );
    assert_eq!(storage.stats().wal_entries_replayed(), 2);
}

#[test]
fn restart_without_checkpoint_replays_everything() {
    let mut storage = TestStorage::new();
    commit_with(&storage, |txn| {
        txn.create_database("db1", ConflictType::Error)?;
        txn.create_table("db1", int_table("t1"), ConflictType::Error)
    })
    .unwrap();
    commit_with(&storage, |txn| txn.append("db1", "t1", int_block(&[1, 2, 3]))).unwrap();
    commit_with(&storage, |txn| txn.drop_table_by_name("db1", "t1", ConflictType::Error)).unwrap();

    storage.reopen();

    let txn = storage.begin_txn().unwrap();
    assert!(txn.list_tables("db1").unwrap().is_empty());
    assert!(txn.get_table_entry("db1", "t1").is_err());
}

#[test]
fn appended_values_read_back_after_restart() {
    let mut storage = TestStorage::new();
    commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, typed_table("tbl1"), ConflictType::Error)
    })
    .unwrap();
    commit_with(&storage, |txn| {
        txn.append(DEFAULT_DATABASE, "tbl1", typed_block(&[(1, 22, 3.33)]))
    })
    .unwrap();

    storage.reopen();

    let txn = storage.begin_txn().unwrap();
    let read = |column| {
        txn.read_block_column(DEFAULT_DATABASE, "tbl1", 0, 0, column)
            .unwrap()
    };
    assert_eq!(read(0), vec![Value::TinyInt(1)]);
    assert_eq!(read(1), vec![Value::BigInt(22)]);
    assert_eq!(read(2), vec![Value::Double(3.33)]);
}

#[test]
fn appends_on_both_sides_of_a_checkpoint_read_back() {
    let config = Config::default()
        .sync_on_commit(false)
        .block_capacity(4)
        .segment_capacity(2);
    let mut storage = TestStorage::with_config(config);
    commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
    })
    .unwrap();
    commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(&[1, 2, 3]))).unwrap();
    storage.checkpoint(false).unwrap();
    commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(&[4, 5, 6]))).unwrap();

    storage.reopen();

    assert_eq!(table_row_count(&storage, DEFAULT_DATABASE, "t1"), 6);
    let txn = storage.begin_txn().unwrap();
    let first = txn.read_block_column(DEFAULT_DATABASE, "t1", 0, 0, 0).unwrap();
    let second = txn.read_block_column(DEFAULT_DATABASE, "t1", 0, 1, 0).unwrap();
    let expected: Vec<Value> = (1..=6).map(Value::Integer).collect();
    assert_eq!([first, second].concat(), expected);
}

fn assert_single_index_chain(storage: &Storage, index_name: &str) {
    let txn = storage.begin_txn().unwrap();
    let table = txn.get_table_entry(DEFAULT_DATABASE, "t1").unwrap();
    let chains = table.index_meta_map();
    let entries = chains.get(index_name).unwrap().entry_list();
    assert_eq!(entries.len(), 2);
    match &entries[0] {
        VersionNode::Live(index) => assert_eq!(index.index_name(), index_name),
        VersionNode::Dummy(_) => panic!("head of the chain is a tombstone"),
    }
    assert_eq!(entries[1].entry_type(), EntryType::Dummy);
    storage.rollback(&txn).unwrap();
}

#[test]
fn index_chain_shape_is_stable_across_restart() {
    let mut storage = TestStorage::new();
    commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
    })
    .unwrap();
    commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(&[7, 8]))).unwrap();
    commit_with(&storage, |txn| {
        let def = IndexDef::new("idx1").with(IndexBase::secondary("idx1_file", vec!["v".into()]));
        txn.create_index_def(DEFAULT_DATABASE, "t1", def, ConflictType::Error)
    })
    .unwrap();
    assert_single_index_chain(&storage, "idx1");

    storage.reopen();
    assert_single_index_chain(&storage, "idx1");

    storage.checkpoint(false).unwrap();
    storage.reopen();
    assert_single_index_chain(&storage, "idx1");

    let txn = storage.begin_txn().unwrap();
    let index = txn
        .get_table_entry(DEFAULT_DATABASE, "t1")
        .unwrap()
        .get_index("idx1", txn.begin_ts())
        .unwrap();
    assert_eq!(index.covered_segments(), &[0]);
}
