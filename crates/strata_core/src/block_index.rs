//! Per-snapshot scan index over a table's blocks.
//!
//! A `BlockIndex` is built from the segments of one table for one read
//! timestamp. It only holds shared references; the catalog owns the
//! segments and blocks.

use crate::catalog::{BlockEntry, SegmentEntry};
use crate::types::{BlockId, GlobalBlockId, SegmentId, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup from (segment id, block id) to block, plus the visible blocks in
/// insertion order.
#[derive(Debug, Default)]
pub struct BlockIndex {
    segment_index: HashMap<SegmentId, Arc<SegmentEntry>>,
    segment_block_index: HashMap<SegmentId, HashMap<BlockId, Arc<BlockEntry>>>,
    global_blocks: Vec<GlobalBlockId>,
}

impl BlockIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-sizes for `segments` segments.
    pub fn reserve(&mut self, segments: usize) {
        self.segment_index.reserve(segments);
        self.segment_block_index.reserve(segments);
    }

    /// Admits `segment` and its blocks visible at `ts`.
    ///
    /// With `check_ts` the segment must satisfy
    /// `min_row_ts <= ts < deprecate_ts`; without it the segment is taken as
    /// is. Blocks are admitted when `min_row_ts <= ts`, in block order.
    pub fn insert(&mut self, segment: &Arc<SegmentEntry>, ts: Timestamp, check_ts: bool) {
        if check_ts && !segment.is_visible(ts) {
            return;
        }
        let segment_id = segment.segment_id();
        self.segment_index.insert(segment_id, Arc::clone(segment));

        let blocks = self.segment_block_index.entry(segment_id).or_default();
        for block in segment.blocks() {
            if block.min_row_ts() > ts {
                continue;
            }
            let block_id = block.block_id();
            if blocks.insert(block_id, block).is_none() {
                self.global_blocks.push(GlobalBlockId {
                    segment_id,
                    block_id,
                });
            }
        }
    }

    /// Block by id, if both levels are present.
    #[must_use]
    pub fn get_block_entry(&self, segment_id: SegmentId, block_id: BlockId) -> Option<&Arc<BlockEntry>> {
        self.segment_block_index.get(&segment_id)?.get(&block_id)
    }

    /// Admitted segments by id.
    #[must_use]
    pub fn segment_index(&self) -> &HashMap<SegmentId, Arc<SegmentEntry>> {
        &self.segment_index
    }

    /// Admitted blocks by segment and block id.
    #[must_use]
    pub fn segment_block_index(&self) -> &HashMap<SegmentId, HashMap<BlockId, Arc<BlockEntry>>> {
        &self.segment_block_index
    }

    /// Admitted blocks in insertion order.
    #[must_use]
    pub fn global_blocks(&self) -> &[GlobalBlockId] {
        &self.global_blocks
    }

    /// Number of admitted blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.global_blocks.len()
    }

    /// Number of admitted segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segment_index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferManager;
    use crate::catalog::{BlockLayout, ColumnDef, TableDef, TableEntry};
    use crate::data::DataBlock;
    use proptest::prelude::*;
    use strata_codec::{LogicalType, Value};
    use strata_storage::MemoryProvider;

    fn table() -> TableEntry {
        TableEntry::new(
            "db",
            "data/db_1",
            TableDef::new("t", vec![ColumnDef::new(0, "v", LogicalType::Integer)]),
            BlockLayout {
                block_capacity: 2,
                segment_capacity: 2,
            },
            crate::types::Timestamp(1),
        )
    }

    fn rows(n: usize) -> DataBlock {
        let mut block = DataBlock::new(&[LogicalType::Integer]);
        for i in 0..n {
            block.append_row(vec![Value::Integer(i as i32)]).unwrap();
        }
        block
    }

    #[test]
    fn admits_by_timestamp() {
        let buffer = BufferManager::new(Arc::new(MemoryProvider::new()));
        let table = table();
        table.append(&rows(3), Timestamp(5), &buffer).unwrap();
        table.append(&rows(2), Timestamp(7), &buffer).unwrap();

        let index = table.block_index(Timestamp(5));
        assert_eq!(index.segment_count(), 1);
        assert_eq!(
            index.global_blocks(),
            &[
                GlobalBlockId {
                    segment_id: 0,
                    block_id: 0
                },
                GlobalBlockId {
                    segment_id: 0,
                    block_id: 1
                }
            ]
        );

        let index = table.block_index(Timestamp(7));
        assert_eq!(index.segment_count(), 2);
        assert_eq!(index.block_count(), 3);
        assert_eq!(index.get_block_entry(1, 0).unwrap().row_count(), 1);
        assert!(index.get_block_entry(1, 1).is_none());
        assert!(index.get_block_entry(9, 0).is_none());

        assert_eq!(table.block_index(Timestamp(4)).block_count(), 0);
    }

    #[test]
    fn unchecked_insert_ignores_segment_window() {
        let buffer = BufferManager::new(Arc::new(MemoryProvider::new()));
        let table = table();
        table.import_segment(&[rows(1)], Timestamp(3), &buffer).unwrap();
        table.compact(&[0], 1, None, Timestamp(4), &buffer).unwrap();

        let deprecated = table.get_segment_by_id(0, Timestamp(4)).unwrap();
        let mut checked = BlockIndex::new();
        checked.insert(&deprecated, Timestamp(4), true);
        assert_eq!(checked.segment_count(), 0);

        let mut unchecked = BlockIndex::new();
        unchecked.reserve(1);
        unchecked.insert(&deprecated, Timestamp(4), false);
        assert_eq!(unchecked.block_count(), 1);
    }

    proptest! {
        #[test]
        fn global_order_follows_insertion(appends in proptest::collection::vec(1usize..5, 1..6)) {
            let buffer = BufferManager::new(Arc::new(MemoryProvider::new()));
            let table = table();
            for (i, n) in appends.iter().enumerate() {
                table.append(&rows(*n), Timestamp(10 + i as u64), &buffer).unwrap();
            }
            let ts = Timestamp(100);
            let index = table.block_index(ts);
            let expected: Vec<GlobalBlockId> = table
                .live_segments(ts)
                .iter()
                .flat_map(|s| s.blocks().into_iter().map(|b| GlobalBlockId {
                    segment_id: b.segment_id(),
                    block_id: b.block_id(),
                }))
                .collect();
            prop_assert_eq!(index.global_blocks(), expected.as_slice());
            let rows: u64 = index
                .global_blocks()
                .iter()
                .map(|g| u64::from(index.get_block_entry(g.segment_id, g.block_id).unwrap().row_count()))
                .sum();
            prop_assert_eq!(rows, appends.iter().sum::<usize>() as u64);
        }
    }
}
