//! Block and block-column entries.

use super::entry::{BaseEntry, CatalogEntry, EntryType};
use super::table::ColumnDef;
use crate::buffer::{BufferManager, ColumnHandle};
use crate::data::DataBlock;
use crate::error::{CoreError, CoreResult};
use crate::types::{BlockId, ColumnId, SegmentId, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strata_codec::{LogicalType, Value};

/// Rows `..end_row` committed at or before `commit_ts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    /// Exclusive end row.
    pub end_row: u32,
    /// Commit timestamp of the rows ending here.
    pub commit_ts: Timestamp,
}

/// Storage of one column within a block.
#[derive(Debug)]
pub struct BlockColumnEntry {
    base: BaseEntry,
    column_id: ColumnId,
    handle: ColumnHandle,
}

impl BlockColumnEntry {
    /// Column position in the table.
    #[must_use]
    pub fn column_id(&self) -> ColumnId {
        self.column_id
    }

    /// Column type.
    #[must_use]
    pub fn logical_type(&self) -> LogicalType {
        self.handle.logical_type()
    }

    /// Buffer manager handle.
    #[must_use]
    pub fn handle(&self) -> &ColumnHandle {
        &self.handle
    }
}

impl CatalogEntry for BlockColumnEntry {
    fn base(&self) -> &BaseEntry {
        &self.base
    }
}

/// A fixed-capacity, append-only run of rows.
#[derive(Debug)]
pub struct BlockEntry {
    base: BaseEntry,
    segment_id: SegmentId,
    block_id: BlockId,
    row_capacity: u32,
    ranges: RwLock<Vec<RowRange>>,
    columns: Vec<BlockColumnEntry>,
}

impl BlockEntry {
    pub(crate) fn new(
        segment_dir: &str,
        segment_id: SegmentId,
        block_id: BlockId,
        columns: &[ColumnDef],
        row_capacity: u32,
        min_row_ts: Timestamp,
    ) -> Self {
        Self::restore(segment_dir, segment_id, block_id, columns, row_capacity, min_row_ts, Vec::new())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        segment_dir: &str,
        segment_id: SegmentId,
        block_id: BlockId,
        columns: &[ColumnDef],
        row_capacity: u32,
        min_row_ts: Timestamp,
        ranges: Vec<RowRange>,
    ) -> Self {
        let columns = columns
            .iter()
            .map(|def| BlockColumnEntry {
                base: BaseEntry::new(EntryType::Column, min_row_ts),
                column_id: def.id,
                handle: ColumnHandle::new(
                    format!("{segment_dir}/blk_{block_id}/col_{}", def.id),
                    def.logical_type,
                ),
            })
            .collect();
        Self {
            base: BaseEntry::new(EntryType::Block, min_row_ts),
            segment_id,
            block_id,
            row_capacity,
            ranges: RwLock::new(ranges),
            columns,
        }
    }

    /// Block id within its segment.
    #[must_use]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Owning segment.
    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Commit timestamp of the first rows.
    #[must_use]
    pub fn min_row_ts(&self) -> Timestamp {
        self.base.begin_ts()
    }

    /// Commit timestamp of the latest rows.
    #[must_use]
    pub fn max_row_ts(&self) -> Timestamp {
        self.ranges
            .read()
            .last()
            .map_or(self.min_row_ts(), |r| r.commit_ts)
    }

    /// Maximum rows the block holds.
    #[must_use]
    pub fn row_capacity(&self) -> u32 {
        self.row_capacity
    }

    /// Committed rows.
    #[must_use]
    pub fn row_count(&self) -> u32 {
        self.ranges.read().last().map_or(0, |r| r.end_row)
    }

    /// Rows visible to a reader at `ts`.
    #[must_use]
    pub fn row_count_at(&self, ts: Timestamp) -> u32 {
        self.ranges
            .read()
            .iter()
            .rev()
            .find(|r| r.commit_ts <= ts)
            .map_or(0, |r| r.end_row)
    }

    /// Free row slots.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.row_capacity.saturating_sub(self.row_count())
    }

    /// Whether no more rows fit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Commit boundaries of the rows.
    #[must_use]
    pub fn row_ranges(&self) -> Vec<RowRange> {
        self.ranges.read().clone()
    }

    /// Column storage entries.
    #[must_use]
    pub fn columns(&self) -> &[BlockColumnEntry] {
        &self.columns
    }

    /// Storage entry of one column.
    #[must_use]
    pub fn get_column_block_entry(&self, column_id: ColumnId) -> Option<&BlockColumnEntry> {
        self.columns.iter().find(|c| c.column_id == column_id)
    }

    /// Reads the rows of a column visible at `ts`.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` for an unknown column or a buffer error.
    pub fn read_column(
        &self,
        column_id: ColumnId,
        ts: Timestamp,
        buffer: &BufferManager,
    ) -> CoreResult<Vec<Value>> {
        let column = self
            .get_column_block_entry(column_id)
            .ok_or_else(|| CoreError::ColumnNotFound {
                column: column_id.to_string(),
            })?;
        let rows = self.row_count_at(ts) as usize;
        if rows == 0 {
            return Ok(Vec::new());
        }
        buffer.get_column_data(column.handle())?.decode(rows)
    }

    /// Reads every row visible at `ts` into a data block.
    pub(crate) fn read_rows(&self, ts: Timestamp, buffer: &BufferManager) -> CoreResult<DataBlock> {
        let rows = self.row_count_at(ts) as usize;
        let mut block = DataBlock::new(&self.columns.iter().map(BlockColumnEntry::logical_type).collect::<Vec<_>>());
        if rows == 0 {
            return Ok(block);
        }
        let mut columns = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            columns.push(buffer.get_column_data(column.handle())?.decode(rows)?);
        }
        for row in 0..rows {
            block.append_row(columns.iter().map(|c| c[row].clone()).collect())?;
        }
        Ok(block)
    }

    /// Writes `count` rows of `data` starting at `offset` and publishes them
    /// at `commit_ts`.
    ///
    /// Column data is written before the row range is published, so readers
    /// never see rows whose bytes are missing.
    pub(crate) fn append(
        &self,
        data: &DataBlock,
        offset: usize,
        count: usize,
        commit_ts: Timestamp,
        buffer: &BufferManager,
    ) -> CoreResult<()> {
        if count as u32 > self.remaining() {
            return Err(CoreError::unrecoverable(format!(
                "block {}:{} has {} free rows, {count} appended",
                self.segment_id,
                self.block_id,
                self.remaining()
            )));
        }
        let row_offset = u64::from(self.row_count());
        for (column, vector) in self.columns.iter().zip(data.columns()) {
            buffer.append_column_data(
                column.handle(),
                &vector.values()[offset..offset + count],
                row_offset,
            )?;
        }

        let end_row = row_offset as u32 + count as u32;
        let mut ranges = self.ranges.write();
        match ranges.last_mut() {
            Some(last) if last.commit_ts == commit_ts => last.end_row = end_row,
            _ => ranges.push(RowRange { end_row, commit_ts }),
        }
        Ok(())
    }
}

impl CatalogEntry for BlockEntry {
    fn base(&self) -> &BaseEntry {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_storage::MemoryProvider;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new(0, "c1", LogicalType::TinyInt),
            ColumnDef::new(1, "c2", LogicalType::BigInt),
        ]
    }

    fn rows(n: usize) -> DataBlock {
        let mut block = DataBlock::new(&[LogicalType::TinyInt, LogicalType::BigInt]);
        for i in 0..n {
            block
                .append_row(vec![Value::TinyInt(i as i8), Value::BigInt(i as i64 * 10)])
                .unwrap();
        }
        block
    }

    #[test]
    fn append_publishes_ranges() {
        let buffer = BufferManager::new(Arc::new(MemoryProvider::new()));
        let block = BlockEntry::new("data/t/seg_0", 0, 0, &columns(), 4, Timestamp(10));

        block.append(&rows(2), 0, 2, Timestamp(10), &buffer).unwrap();
        block.append(&rows(3), 1, 1, Timestamp(12), &buffer).unwrap();

        assert_eq!(block.row_count(), 3);
        assert_eq!(block.row_count_at(Timestamp(9)), 0);
        assert_eq!(block.row_count_at(Timestamp(11)), 2);
        assert_eq!(block.row_count_at(Timestamp(12)), 3);
        assert_eq!(block.max_row_ts(), Timestamp(12));
        assert_eq!(block.remaining(), 1);

        let values = block.read_column(1, Timestamp(12), &buffer).unwrap();
        assert_eq!(values, vec![Value::BigInt(0), Value::BigInt(10), Value::BigInt(10)]);
        assert_eq!(block.read_column(1, Timestamp(11), &buffer).unwrap().len(), 2);
    }

    #[test]
    fn overflow_is_rejected() {
        let buffer = BufferManager::new(Arc::new(MemoryProvider::new()));
        let block = BlockEntry::new("data/t/seg_0", 0, 0, &columns(), 2, Timestamp(1));
        let result = block.append(&rows(3), 0, 3, Timestamp(1), &buffer);
        assert!(matches!(result, Err(CoreError::Unrecoverable { .. })));
        assert_eq!(block.row_count(), 0);
    }

    #[test]
    fn column_entries_follow_table() {
        let block = BlockEntry::new("data/t/seg_3", 3, 1, &columns(), 8, Timestamp(1));
        let column = block.get_column_block_entry(1).unwrap();
        assert_eq!(column.logical_type(), LogicalType::BigInt);
        assert_eq!(column.handle().key(), "data/t/seg_3/blk_1/col_1");
        assert_eq!(column.base().entry_type(), EntryType::Column);
        assert!(block.get_column_block_entry(7).is_none());
    }

    #[test]
    fn read_rows_rebuilds_block() {
        let buffer = BufferManager::new(Arc::new(MemoryProvider::new()));
        let block = BlockEntry::new("data/t/seg_0", 0, 0, &columns(), 8, Timestamp(1));
        block.append(&rows(3), 0, 3, Timestamp(1), &buffer).unwrap();

        assert_eq!(block.read_rows(Timestamp(1), &buffer).unwrap(), rows(3));
        assert_eq!(block.read_rows(Timestamp(0), &buffer).unwrap().row_count(), 0);
    }
}
