//! Segment entries.

use super::block::{BlockEntry, RowRange};
use super::entry::{BaseEntry, CatalogEntry, EntryType};
use super::table::ColumnDef;
use crate::buffer::BufferManager;
use crate::data::DataBlock;
use crate::error::{CoreError, CoreResult};
use crate::types::{BlockId, SegmentId, Timestamp};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An ordered run of blocks.
///
/// Appends fill the newest open segment of a table. Once sealed a segment
/// only changes when compaction deprecates it.
#[derive(Debug)]
pub struct SegmentEntry {
    base: BaseEntry,
    segment_id: SegmentId,
    dir: String,
    sealed: AtomicBool,
    blocks: RwLock<Vec<Arc<BlockEntry>>>,
}

impl SegmentEntry {
    pub(crate) fn new(table_dir: &str, segment_id: SegmentId, min_row_ts: Timestamp) -> Self {
        Self {
            base: BaseEntry::new(EntryType::Segment, min_row_ts),
            segment_id,
            dir: format!("{table_dir}/seg_{segment_id}"),
            sealed: AtomicBool::new(false),
            blocks: RwLock::new(Vec::new()),
        }
    }

    /// Segment id, dense per table.
    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Commit timestamp of the first rows; the segment is invisible before it.
    #[must_use]
    pub fn min_row_ts(&self) -> Timestamp {
        self.base.begin_ts()
    }

    /// Timestamp at which compaction superseded the segment, or `UNCOMMIT_TS`.
    #[must_use]
    pub fn deprecate_ts(&self) -> Timestamp {
        self.base.deprecate_ts()
    }

    /// Storage key prefix of the segment's columns.
    #[must_use]
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Commit timestamp of the newest rows.
    #[must_use]
    pub fn max_row_ts(&self) -> Timestamp {
        self.blocks
            .read()
            .iter()
            .map(|b| b.max_row_ts())
            .max()
            .unwrap_or_else(|| self.min_row_ts())
    }

    /// Whether appends may no longer extend the segment.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Whether a reader at `ts` scans this segment.
    #[must_use]
    pub fn is_visible(&self, ts: Timestamp) -> bool {
        self.base.is_visible(ts)
    }

    /// Blocks in id order.
    #[must_use]
    pub fn blocks(&self) -> Vec<Arc<BlockEntry>> {
        self.blocks.read().clone()
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    /// Block by id.
    #[must_use]
    pub fn get_block_entry_by_id(&self, block_id: BlockId) -> Option<Arc<BlockEntry>> {
        self.blocks.read().get(usize::from(block_id)).cloned()
    }

    /// Every committed row across all blocks.
    #[must_use]
    pub fn actual_row_count(&self) -> u64 {
        self.blocks
            .read()
            .iter()
            .map(|b| u64::from(b.row_count()))
            .sum()
    }

    /// Rows visible at `ts`.
    #[must_use]
    pub fn row_count_at(&self, ts: Timestamp) -> u64 {
        self.blocks
            .read()
            .iter()
            .map(|b| u64::from(b.row_count_at(ts)))
            .sum()
    }

    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub(crate) fn deprecate(&self, ts: Timestamp) -> CoreResult<()> {
        self.seal();
        self.base.deprecate(ts)
    }

    pub(crate) fn push_block(&self, block: Arc<BlockEntry>) -> CoreResult<()> {
        let mut blocks = self.blocks.write();
        if usize::from(block.block_id()) != blocks.len() {
            return Err(CoreError::unrecoverable(format!(
                "segment {} expects block {}, got {}",
                self.segment_id,
                blocks.len(),
                block.block_id()
            )));
        }
        blocks.push(block);
        Ok(())
    }

    fn open_block(
        &self,
        columns: &[ColumnDef],
        block_capacity: u32,
        max_blocks: usize,
        ts: Timestamp,
    ) -> CoreResult<Option<Arc<BlockEntry>>> {
        if let Some(last) = self.blocks.read().last() {
            if !last.is_full() {
                return Ok(Some(Arc::clone(last)));
            }
        }
        let count = self.block_count();
        if count >= max_blocks {
            return Ok(None);
        }
        let block_id = BlockId::try_from(count)
            .map_err(|_| CoreError::unrecoverable(format!("segment {} has too many blocks", self.segment_id)))?;
        let block = Arc::new(BlockEntry::new(
            &self.dir,
            self.segment_id,
            block_id,
            columns,
            block_capacity,
            ts,
        ));
        self.push_block(Arc::clone(&block))?;
        Ok(Some(block))
    }

    /// Appends rows of `data` from `offset` on until the segment is full.
    ///
    /// Returns how many rows were written. Seals the segment when its last
    /// block fills up.
    pub(crate) fn append_rows(
        &self,
        data: &DataBlock,
        offset: usize,
        columns: &[ColumnDef],
        block_capacity: u32,
        max_blocks: usize,
        commit_ts: Timestamp,
        buffer: &BufferManager,
    ) -> CoreResult<usize> {
        let total = data.row_count() - offset;
        let mut written = 0;
        while written < total {
            let Some(block) = self.open_block(columns, block_capacity, max_blocks, commit_ts)? else {
                break;
            };
            let count = (block.remaining() as usize).min(total - written);
            block.append(data, offset + written, count, commit_ts, buffer)?;
            written += count;
        }

        let full = self.block_count() >= max_blocks
            && self.blocks.read().last().is_some_and(|b| b.is_full());
        if full {
            self.seal();
        }
        Ok(written)
    }

    pub(crate) fn restore_block(
        &self,
        block_id: BlockId,
        columns: &[ColumnDef],
        row_capacity: u32,
        min_row_ts: Timestamp,
        ranges: Vec<RowRange>,
    ) -> CoreResult<()> {
        self.push_block(Arc::new(BlockEntry::restore(
            &self.dir,
            self.segment_id,
            block_id,
            columns,
            row_capacity,
            min_row_ts,
            ranges,
        )))
    }

    /// Reads every row visible at `ts`, block after block.
    pub(crate) fn read_rows(&self, ts: Timestamp, buffer: &BufferManager) -> CoreResult<DataBlock> {
        let mut out: Option<DataBlock> = None;
        for block in self.blocks() {
            let rows = block.read_rows(ts, buffer)?;
            match out.as_mut() {
                Some(acc) => acc.extend(&rows)?,
                None => out = Some(rows),
            }
        }
        Ok(out.unwrap_or_else(|| DataBlock::new(&[])))
    }
}

impl CatalogEntry for SegmentEntry {
    fn base(&self) -> &BaseEntry {
        &self.base
    }
}
