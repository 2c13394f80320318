//! Table entries: schema, segments and index metadata.

use super::entry::{BaseEntry, CatalogEntry, EntryType, VersionChain};
use super::index::{IndexDef, TableIndexEntry};
use super::segment::SegmentEntry;
use super::validate_identifier;
use crate::block_index::BlockIndex;
use crate::buffer::BufferManager;
use crate::data::DataBlock;
use crate::error::{CoreError, CoreResult};
use crate::types::{ColumnId, SegmentId, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use strata_codec::LogicalType;
use tracing::debug;

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Position in the table, starting at 0.
    pub id: ColumnId,
    /// Column name.
    pub name: String,
    /// Value type.
    pub logical_type: LogicalType,
}

impl ColumnDef {
    /// Creates a column definition.
    pub fn new(id: ColumnId, name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            id,
            name: name.into(),
            logical_type,
        }
    }
}

/// Table name and ordered columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub table_name: String,
    /// Columns in id order.
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Creates a table definition.
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
        }
    }

    /// Checks names and column numbering.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a bad identifier, no columns, duplicate
    /// names, ids out of order, or a zero-dimension embedding.
    pub fn validate(&self) -> CoreResult<()> {
        validate_identifier("table", &self.table_name)?;
        if self.columns.is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "table {} has no columns",
                self.table_name
            )));
        }
        let mut names = HashSet::new();
        for (position, column) in self.columns.iter().enumerate() {
            validate_identifier("column", &column.name)?;
            if column.id != position {
                return Err(CoreError::invalid_operation(format!(
                    "column {} has id {}, expected {position}",
                    column.name, column.id
                )));
            }
            if !names.insert(column.name.as_str()) {
                return Err(CoreError::invalid_operation(format!(
                    "duplicate column {}",
                    column.name
                )));
            }
            if matches!(column.logical_type, LogicalType::Embedding { dimension: 0 }) {
                return Err(CoreError::invalid_operation(format!(
                    "embedding column {} has no dimension",
                    column.name
                )));
            }
        }
        Ok(())
    }

    /// Column types in id order.
    #[must_use]
    pub fn column_types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(|c| c.logical_type).collect()
    }

    /// Column by name.
    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Physical shape of a table's segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLayout {
    /// Rows per block.
    pub block_capacity: u32,
    /// Blocks per appended segment.
    pub segment_capacity: u16,
}

/// A committed table version.
#[derive(Debug)]
pub struct TableEntry {
    base: BaseEntry,
    db_name: String,
    def: TableDef,
    dir: String,
    layout: BlockLayout,
    segments: RwLock<BTreeMap<SegmentId, Arc<SegmentEntry>>>,
    next_segment_id: AtomicU32,
    segment_id_base: SegmentId,
    index_meta_map: RwLock<BTreeMap<String, Arc<VersionChain<TableIndexEntry>>>>,
}

impl TableEntry {
    pub(crate) fn new(
        db_name: &str,
        db_dir: &str,
        def: TableDef,
        layout: BlockLayout,
        commit_ts: Timestamp,
    ) -> Self {
        let dir = format!("{db_dir}/{}_{}", def.table_name, commit_ts.as_u64());
        Self::restore(db_name, dir, def, layout, commit_ts, 0)
    }

    pub(crate) fn restore(
        db_name: &str,
        dir: String,
        def: TableDef,
        layout: BlockLayout,
        commit_ts: Timestamp,
        next_segment_id: SegmentId,
    ) -> Self {
        Self {
            base: BaseEntry::new(EntryType::Table, commit_ts),
            db_name: db_name.to_string(),
            def,
            dir,
            layout,
            segments: RwLock::new(BTreeMap::new()),
            next_segment_id: AtomicU32::new(next_segment_id),
            segment_id_base: next_segment_id,
            index_meta_map: RwLock::new(BTreeMap::new()),
        }
    }

    /// Owning database name.
    #[must_use]
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.def.table_name
    }

    /// Schema.
    #[must_use]
    pub fn table_def(&self) -> &TableDef {
        &self.def
    }

    /// Columns in id order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.def.columns
    }

    /// Storage key prefix of the table's segments.
    #[must_use]
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Block and segment sizing.
    #[must_use]
    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    /// Number of segment ids ever allocated.
    ///
    /// The next segment created receives this id. Ids are never reused, so
    /// a compaction output is numbered above all of its inputs.
    #[must_use]
    pub fn get_next_segment_id(&self) -> SegmentId {
        self.next_segment_id.load(Ordering::Acquire)
    }

    /// Segment by id, if it holds rows at or before `ts`.
    ///
    /// Deprecated segments are still returned so callers can inspect a
    /// compaction's inputs.
    #[must_use]
    pub fn get_segment_by_id(&self, segment_id: SegmentId, ts: Timestamp) -> Option<Arc<SegmentEntry>> {
        self.segments
            .read()
            .get(&segment_id)
            .filter(|s| s.min_row_ts() <= ts)
            .cloned()
    }

    /// Segments a reader at `ts` scans, in id order.
    #[must_use]
    pub fn live_segments(&self, ts: Timestamp) -> Vec<Arc<SegmentEntry>> {
        self.segments
            .read()
            .values()
            .filter(|s| s.is_visible(ts))
            .cloned()
            .collect()
    }

    /// Every segment still in the catalog, deprecated ones included.
    #[must_use]
    pub fn all_segments(&self) -> Vec<Arc<SegmentEntry>> {
        self.segments.read().values().cloned().collect()
    }

    /// Rows visible at `ts`.
    #[must_use]
    pub fn row_count(&self, ts: Timestamp) -> u64 {
        self.live_segments(ts)
            .iter()
            .map(|s| s.row_count_at(ts))
            .sum()
    }

    /// Builds the scan index of the table at `ts`.
    #[must_use]
    pub fn block_index(&self, ts: Timestamp) -> BlockIndex {
        let segments = self.segments.read();
        let mut index = BlockIndex::new();
        index.reserve(segments.len());
        for segment in segments.values() {
            index.insert(segment, ts, true);
        }
        index
    }

    /// Index name to version chain, dropped indexes included.
    #[must_use]
    pub fn index_meta_map(&self) -> BTreeMap<String, Arc<VersionChain<TableIndexEntry>>> {
        self.index_meta_map.read().clone()
    }

    /// Index visible at `ts`.
    #[must_use]
    pub fn get_index(&self, index_name: &str, ts: Timestamp) -> Option<Arc<TableIndexEntry>> {
        self.index_meta_map
            .read()
            .get(index_name)
            .and_then(|chain| chain.visible(ts))
    }

    /// Indexes visible at `ts`, by name.
    #[must_use]
    pub fn list_indexes(&self, ts: Timestamp) -> Vec<Arc<TableIndexEntry>> {
        self.index_meta_map
            .read()
            .values()
            .filter_map(|chain| chain.visible(ts))
            .collect()
    }

    /// Next segment id as of `ts`, counting only segments that existed then.
    pub(crate) fn next_segment_id_at(&self, ts: Timestamp) -> SegmentId {
        self.segments
            .read()
            .values()
            .filter(|s| s.min_row_ts() <= ts)
            .map(|s| s.segment_id() + 1)
            .fold(self.segment_id_base, SegmentId::max)
    }

    fn open_segment(&self) -> Option<Arc<SegmentEntry>> {
        self.segments
            .read()
            .values()
            .next_back()
            .filter(|s| !s.is_sealed() && !s.base().is_deprecated())
            .cloned()
    }

    fn allocate_segment(&self, min_row_ts: Timestamp) -> Arc<SegmentEntry> {
        let segment_id = self.next_segment_id.fetch_add(1, Ordering::AcqRel);
        Arc::new(SegmentEntry::new(&self.dir, segment_id, min_row_ts))
    }

    fn insert_segment(&self, segment: Arc<SegmentEntry>) {
        self.segments.write().insert(segment.segment_id(), segment);
    }

    /// Appends committed rows, filling the open segment first.
    pub(crate) fn append(
        &self,
        data: &DataBlock,
        commit_ts: Timestamp,
        buffer: &BufferManager,
    ) -> CoreResult<()> {
        data.check_schema(self.columns())?;
        let max_blocks = usize::from(self.layout.segment_capacity);
        let mut offset = 0;
        while offset < data.row_count() {
            let segment = match self.open_segment() {
                Some(segment) => segment,
                None => {
                    let segment = self.allocate_segment(commit_ts);
                    self.insert_segment(Arc::clone(&segment));
                    segment
                }
            };
            let written = segment.append_rows(
                data,
                offset,
                self.columns(),
                self.layout.block_capacity,
                max_blocks,
                commit_ts,
                buffer,
            )?;
            if written == 0 {
                segment.seal();
            }
            offset += written;
        }
        debug!(
            table = %self.table_name(),
            rows = data.row_count(),
            %commit_ts,
            "appended rows"
        );
        Ok(())
    }

    fn write_sealed_segment(
        &self,
        blocks: &[&DataBlock],
        commit_ts: Timestamp,
        buffer: &BufferManager,
    ) -> CoreResult<Arc<SegmentEntry>> {
        let segment_id = self.get_next_segment_id();
        let segment = Arc::new(SegmentEntry::new(&self.dir, segment_id, commit_ts));
        for data in blocks {
            data.check_schema(self.columns())?;
            let mut offset = 0;
            while offset < data.row_count() {
                let written = segment.append_rows(
                    data,
                    offset,
                    self.columns(),
                    self.layout.block_capacity,
                    usize::from(u16::MAX),
                    commit_ts,
                    buffer,
                )?;
                if written == 0 {
                    return Err(CoreError::unrecoverable(format!(
                        "segment {segment_id} of {} ran out of blocks",
                        self.table_name()
                    )));
                }
                offset += written;
            }
        }
        segment.seal();
        self.next_segment_id.store(segment_id + 1, Ordering::Release);
        self.insert_segment(Arc::clone(&segment));
        Ok(segment)
    }

    /// Publishes whole data blocks as one new sealed segment.
    pub(crate) fn import_segment(
        &self,
        blocks: &[DataBlock],
        commit_ts: Timestamp,
        buffer: &BufferManager,
    ) -> CoreResult<SegmentId> {
        let refs: Vec<&DataBlock> = blocks.iter().collect();
        let segment = self.write_sealed_segment(&refs, commit_ts, buffer)?;
        debug!(
            table = %self.table_name(),
            segment_id = segment.segment_id(),
            rows = segment.actual_row_count(),
            "imported segment"
        );
        Ok(segment.segment_id())
    }

    /// Reads the rows of `inputs` visible at `ts`, concatenated in input order.
    pub(crate) fn merge_segments(
        &self,
        inputs: &[SegmentId],
        ts: Timestamp,
        buffer: &BufferManager,
    ) -> CoreResult<DataBlock> {
        let mut merged = DataBlock::new(&self.def.column_types());
        for &segment_id in inputs {
            let segment = self.get_segment_by_id(segment_id, ts).ok_or_else(|| {
                CoreError::SegmentNotFound {
                    table_name: self.table_name().to_string(),
                    segment_id,
                }
            })?;
            merged.extend(&segment.read_rows(ts, buffer)?)?;
        }
        Ok(merged)
    }

    /// Replaces `inputs` with one sealed segment holding their rows.
    ///
    /// `merged` carries rows already read by the compaction task; without it
    /// they are re-read at `commit_ts`. Either way the merged row count must
    /// equal `row_count`.
    pub(crate) fn compact(
        &self,
        inputs: &[SegmentId],
        row_count: u64,
        merged: Option<&DataBlock>,
        commit_ts: Timestamp,
        buffer: &BufferManager,
    ) -> CoreResult<SegmentId> {
        let mut sources = Vec::with_capacity(inputs.len());
        for &segment_id in inputs {
            let segment = self.get_segment_by_id(segment_id, commit_ts).ok_or_else(|| {
                CoreError::SegmentNotFound {
                    table_name: self.table_name().to_string(),
                    segment_id,
                }
            })?;
            if segment.base().is_deprecated() {
                return Err(CoreError::unrecoverable(format!(
                    "compaction input {segment_id} of {} already deprecated at {}",
                    self.table_name(),
                    segment.deprecate_ts()
                )));
            }
            sources.push(segment);
        }

        let reread;
        let merged = match merged {
            Some(merged) => merged,
            None => {
                reread = self.merge_segments(inputs, commit_ts, buffer)?;
                &reread
            }
        };
        if merged.row_count() as u64 != row_count {
            return Err(CoreError::unrecoverable(format!(
                "compaction of {} merged {} rows, logged {row_count}",
                self.table_name(),
                merged.row_count()
            )));
        }

        let output = self.write_sealed_segment(&[merged], commit_ts, buffer)?;
        for segment in &sources {
            segment.deprecate(commit_ts)?;
        }
        debug!(
            table = %self.table_name(),
            ?inputs,
            output = output.segment_id(),
            rows = row_count,
            "compacted segments"
        );
        Ok(output.segment_id())
    }

    /// Publishes a new index version.
    pub(crate) fn create_index(
        &self,
        index_def: IndexDef,
        covered_segments: Vec<SegmentId>,
        commit_ts: Timestamp,
    ) -> CoreResult<()> {
        let chain = Arc::clone(
            self.index_meta_map
                .write()
                .entry(index_def.index_name.clone())
                .or_default(),
        );
        if chain.live().is_some() {
            return Err(CoreError::DuplicateIndex {
                table_name: self.table_name().to_string(),
                index_name: index_def.index_name,
            });
        }
        chain.publish(Arc::new(TableIndexEntry::new(index_def, covered_segments, commit_ts)))
    }

    /// Drops the live index `index_name`.
    pub(crate) fn drop_index(&self, index_name: &str, commit_ts: Timestamp) -> CoreResult<()> {
        let chain = self.index_meta_map.read().get(index_name).cloned();
        match chain {
            Some(chain) if chain.deprecate(commit_ts)? => Ok(()),
            _ => Err(CoreError::IndexNotFound {
                table_name: self.table_name().to_string(),
                index_name: index_name.to_string(),
            }),
        }
    }

    pub(crate) fn restore_segment(&self, segment: Arc<SegmentEntry>) {
        let next = segment.segment_id() + 1;
        self.next_segment_id.fetch_max(next, Ordering::AcqRel);
        self.insert_segment(segment);
    }

    pub(crate) fn restore_index(&self, entry: TableIndexEntry) -> CoreResult<()> {
        let chain = Arc::clone(
            self.index_meta_map
                .write()
                .entry(entry.index_name().to_string())
                .or_default(),
        );
        chain.publish(Arc::new(entry))
    }

    /// Drops segments and index versions no snapshot at or after
    /// `oldest_ts` can see. Returns the number of segments removed.
    pub(crate) fn collect_garbage(&self, oldest_ts: Timestamp, buffer: &BufferManager) -> CoreResult<usize> {
        let removed: Vec<Arc<SegmentEntry>> = {
            let mut segments = self.segments.write();
            let ids: Vec<SegmentId> = segments
                .values()
                .filter(|s| s.deprecate_ts() <= oldest_ts)
                .map(|s| s.segment_id())
                .collect();
            ids.iter().filter_map(|id| segments.remove(id)).collect()
        };
        for segment in &removed {
            buffer.remove_prefix(segment.dir())?;
        }

        let mut indexes = self.index_meta_map.write();
        for chain in indexes.values() {
            chain.prune(oldest_ts);
        }
        indexes.retain(|_, chain| !chain.is_vacant());
        Ok(removed.len())
    }
}

impl CatalogEntry for TableEntry {
    fn base(&self) -> &BaseEntry {
        &self.base
    }
}
