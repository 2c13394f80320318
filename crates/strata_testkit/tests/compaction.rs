//! Whole-table compaction through the background worker.

use std::sync::Arc;
use strata_core::{
    CompactSegmentsTask, Config, ConflictType, SegmentId, UNCOMMIT_TS, DEFAULT_DATABASE,
};
use strata_testkit::prelude::*;

const SEGMENTS: i32 = 5;

/// A table of `SEGMENTS` live segments holding one row each.
fn one_row_segments() -> TestStorage {
    let config = Config::default()
        .sync_on_commit(false)
        .block_capacity(1)
        .segment_capacity(1);
    let storage = TestStorage::with_config(config);
    commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
    })
    .unwrap();
    for i in 0..SEGMENTS {
        commit_with(&storage, |txn| txn.append(DEFAULT_DATABASE, "t1", int_block(&[i]))).unwrap();
    }
    storage
}

fn assert_compacted(storage: &TestStorage) {
    let txn = storage.begin_txn().unwrap();
    let table = txn.get_table_entry(DEFAULT_DATABASE, "t1").unwrap();
    let n = SEGMENTS as SegmentId;

    for segment in table.all_segments() {
        if segment.segment_id() < n {
            assert_ne!(segment.deprecate_ts(), UNCOMMIT_TS);
        }
    }
    let live = table.live_segments(txn.begin_ts());
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].segment_id(), n);
    assert_eq!(live[0].deprecate_ts(), UNCOMMIT_TS);
    assert_eq!(live[0].actual_row_count(), u64::from(n));
    storage.rollback(&txn).unwrap();
}

#[test]
fn compact_task_merges_whole_table_into_next_segment_id() {
    let storage = one_row_segments();

    let txn = storage.begin_txn().unwrap();
    let table = txn.get_table_entry(DEFAULT_DATABASE, "t1").unwrap();
    assert_eq!(table.live_segments(txn.begin_ts()).len(), SEGMENTS as usize);

    let task = Arc::new(CompactSegmentsTask::make_task_with_whole_table(
        table,
        Arc::clone(&txn),
    ));
    storage.bg_processor().submit(task.clone()).unwrap();
    task.wait().unwrap();
    assert_eq!(task.inputs(), &[0, 1, 2, 3, 4]);
    storage.commit(&txn).unwrap();

    assert_compacted(&storage);
}

#[test]
fn compaction_survives_restart() {
    let mut storage = one_row_segments();
    let info = storage.compact_table(DEFAULT_DATABASE, "t1").unwrap();
    assert_eq!(info.output_segment, Some(SEGMENTS as SegmentId));

    storage.reopen();
    assert_compacted(&storage);

    let txn = storage.begin_txn().unwrap();
    let values = txn
        .read_block_column(DEFAULT_DATABASE, "t1", SEGMENTS as SegmentId, 0, 0)
        .unwrap();
    assert_eq!(values.len(), 1);
}

#[test]
fn snapshot_before_compaction_still_reads_inputs() {
    let storage = one_row_segments();
    let reader = storage.begin_txn().unwrap();

    storage.compact_table(DEFAULT_DATABASE, "t1").unwrap();

    let table = reader.get_table_entry(DEFAULT_DATABASE, "t1").unwrap();
    let live: Vec<_> = table
        .live_segments(reader.begin_ts())
        .iter()
        .map(|s| s.segment_id())
        .collect();
    assert_eq!(live, vec![0, 1, 2, 3, 4]);
    assert_eq!(table.row_count(reader.begin_ts()), SEGMENTS as u64);
}

#[test]
fn compaction_conflicts_with_concurrent_append() {
    let storage = one_row_segments();
    let appender = storage.begin_txn().unwrap();
    appender
        .append(DEFAULT_DATABASE, "t1", int_block(&[99]))
        .unwrap();

    storage.compact_table(DEFAULT_DATABASE, "t1").unwrap();
    assert!(storage.commit(&appender).is_err());
    assert_eq!(table_row_count(&storage, DEFAULT_DATABASE, "t1"), SEGMENTS as u64);
}

#[test]
fn compacting_an_empty_table_is_a_no_op() {
    let storage = TestStorage::new();
    commit_with(&storage, |txn| {
        txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)
    })
    .unwrap();
    let info = storage.compact_table(DEFAULT_DATABASE, "t1").unwrap();
    assert!(info.inputs.is_empty());
    assert_eq!(info.output_segment, None);
    assert_eq!(storage.stats().compactions(), 0);
}
