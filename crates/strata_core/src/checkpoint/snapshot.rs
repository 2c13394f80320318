//! Catalog snapshots persisted by checkpoints.

use crate::catalog::{
    BlockLayout, Catalog, CatalogEntry, DatabaseEntry, IndexDef, RowRange, SegmentEntry,
    TableDef, TableEntry, TableIndexEntry,
};
use crate::error::{CoreError, CoreResult};
use crate::types::{BlockId, SegmentId, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_codec::{from_cbor, to_cbor};

/// Magic bytes for checkpoint files.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"SCKP";

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4).
const HEADER_SIZE: usize = 10;

/// A block as of the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    /// Block id.
    pub block_id: BlockId,
    /// Maximum rows.
    pub row_capacity: u32,
    /// Commit timestamp of the first rows.
    pub min_row_ts: Timestamp,
    /// Row ranges committed at or before the checkpoint.
    pub ranges: Vec<RowRange>,
}

/// A segment as of the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSnapshot {
    /// Segment id.
    pub segment_id: SegmentId,
    /// Commit timestamp of the first rows.
    pub min_row_ts: Timestamp,
    /// Whether appends had stopped extending it.
    pub sealed: bool,
    /// Blocks that existed at the checkpoint.
    pub blocks: Vec<BlockSnapshot>,
}

/// An index version as of the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Definition.
    pub index_def: IndexDef,
    /// Segments the index covers.
    pub covered_segments: Vec<SegmentId>,
    /// Commit timestamp of the index.
    pub begin_ts: Timestamp,
}

/// A table version as of the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Schema.
    pub table_def: TableDef,
    /// Storage key prefix.
    pub dir: String,
    /// Commit timestamp of the table.
    pub begin_ts: Timestamp,
    /// Block and segment sizing.
    pub layout: BlockLayout,
    /// Segment ids allocated up to the checkpoint.
    pub next_segment_id: SegmentId,
    /// Live segments.
    pub segments: Vec<SegmentSnapshot>,
    /// Live indexes.
    pub indexes: Vec<IndexSnapshot>,
}

/// A database version as of the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    /// Database name.
    pub db_name: String,
    /// Storage key prefix.
    pub dir: String,
    /// Commit timestamp of the database.
    pub begin_ts: Timestamp,
    /// Live tables.
    pub tables: Vec<TableSnapshot>,
}

/// Everything live in the catalog at one timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Timestamp the catalog was captured at.
    pub checkpoint_ts: Timestamp,
    /// Live databases.
    pub databases: Vec<DatabaseSnapshot>,
}

fn capture_segment(segment: &SegmentEntry, ts: Timestamp) -> SegmentSnapshot {
    let blocks = segment
        .blocks()
        .iter()
        .filter(|b| b.min_row_ts() <= ts)
        .map(|b| BlockSnapshot {
            block_id: b.block_id(),
            row_capacity: b.row_capacity(),
            min_row_ts: b.min_row_ts(),
            ranges: b
                .row_ranges()
                .into_iter()
                .filter(|r| r.commit_ts <= ts)
                .collect(),
        })
        .collect();
    SegmentSnapshot {
        segment_id: segment.segment_id(),
        min_row_ts: segment.min_row_ts(),
        sealed: segment.is_sealed() && segment.max_row_ts() <= ts,
        blocks,
    }
}

fn capture_table(table: &TableEntry, ts: Timestamp) -> TableSnapshot {
    TableSnapshot {
        table_def: table.table_def().clone(),
        dir: table.dir().to_string(),
        begin_ts: table.base().begin_ts(),
        layout: table.layout(),
        next_segment_id: table.next_segment_id_at(ts),
        segments: table
            .live_segments(ts)
            .iter()
            .map(|s| capture_segment(s, ts))
            .collect(),
        indexes: table
            .list_indexes(ts)
            .iter()
            .map(|index| IndexSnapshot {
                index_def: index.index_def().clone(),
                covered_segments: index.covered_segments().to_vec(),
                begin_ts: index.base().begin_ts(),
            })
            .collect(),
    }
}

impl CatalogSnapshot {
    /// Captures the catalog as a reader at `ts` sees it.
    #[must_use]
    pub fn capture(catalog: &Catalog, ts: Timestamp) -> Self {
        let databases = catalog
            .list_databases(ts)
            .iter()
            .map(|db| DatabaseSnapshot {
                db_name: db.db_name().to_string(),
                dir: db.dir().to_string(),
                begin_ts: db.base().begin_ts(),
                tables: db
                    .list_tables(ts)
                    .iter()
                    .map(|t| capture_table(t, ts))
                    .collect(),
            })
            .collect();
        Self {
            checkpoint_ts: ts,
            databases,
        }
    }

    /// Rebuilds a catalog holding exactly the captured state.
    pub fn restore(&self) -> CoreResult<Catalog> {
        let catalog = Catalog::new();
        for db in &self.databases {
            let database = Arc::new(DatabaseEntry::restore(&db.db_name, db.dir.clone(), db.begin_ts));
            for t in &db.tables {
                let table = Arc::new(TableEntry::restore(
                    &db.db_name,
                    t.dir.clone(),
                    t.table_def.clone(),
                    t.layout,
                    t.begin_ts,
                    t.next_segment_id,
                ));
                for s in &t.segments {
                    let segment = SegmentEntry::new(table.dir(), s.segment_id, s.min_row_ts);
                    for b in &s.blocks {
                        segment.restore_block(
                            b.block_id,
                            table.columns(),
                            b.row_capacity,
                            b.min_row_ts,
                            b.ranges.clone(),
                        )?;
                    }
                    if s.sealed {
                        segment.seal();
                    }
                    table.restore_segment(Arc::new(segment));
                }
                for index in &t.indexes {
                    table.restore_index(TableIndexEntry::new(
                        index.index_def.clone(),
                        index.covered_segments.clone(),
                        index.begin_ts,
                    ))?;
                }
                database.restore_table(table)?;
            }
            catalog.restore_database(database)?;
        }
        Ok(catalog)
    }

    /// Encodes the snapshot with its envelope.
    ///
    /// ```text
    /// | magic "SCKP" (4) | version (2) | length (4) | cbor (N) | crc32 (4) |
    /// ```
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let body = to_cbor(self)?;
        let len = u32::try_from(body.len())
            .map_err(|_| CoreError::invalid_operation("checkpoint too large"))?;
        let mut buf = Vec::with_capacity(HEADER_SIZE + body.len() + 4);
        buf.extend_from_slice(&CHECKPOINT_MAGIC);
        buf.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&body);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a checkpoint file.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_SIZE + 4 || data[0..4] != CHECKPOINT_MAGIC {
            return Err(CoreError::checkpoint_corruption("invalid checkpoint magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > CHECKPOINT_VERSION {
            return Err(CoreError::checkpoint_corruption(format!(
                "unsupported checkpoint version: {version}"
            )));
        }
        let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        let body_end = HEADER_SIZE + len;
        if data.len() != body_end + 4 {
            return Err(CoreError::checkpoint_corruption("checkpoint length mismatch"));
        }
        let stored = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let computed = crc32fast::hash(&data[..body_end]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }
        from_cbor(&data[HEADER_SIZE..body_end])
            .map_err(|e| CoreError::checkpoint_corruption(format!("bad checkpoint: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferManager;
    use crate::catalog::{ColumnDef, IndexBase};
    use crate::data::DataBlock;
    use crate::types::UNCOMMIT_TS;
    use crate::wal::WalCmd;
    use strata_codec::{LogicalType, Value};
    use strata_storage::MemoryProvider;

    fn rows(n: i64) -> DataBlock {
        let mut block = DataBlock::new(&[LogicalType::BigInt]);
        for i in 0..n {
            block.append_row(vec![Value::BigInt(i)]).unwrap();
        }
        block
    }

    fn populated(buffer: &BufferManager) -> Catalog {
        let catalog = Catalog::new();
        let cmds = [
            (2, WalCmd::CreateDatabase { db_name: "db1".into() }),
            (
                3,
                WalCmd::CreateTable {
                    db_name: "db1".into(),
                    table_def: TableDef::new("t1", vec![ColumnDef::new(0, "v", LogicalType::BigInt)]),
                    layout: BlockLayout {
                        block_capacity: 2,
                        segment_capacity: 2,
                    },
                },
            ),
            (
                4,
                WalCmd::Append {
                    db_name: "db1".into(),
                    table_name: "t1".into(),
                    block: rows(3),
                },
            ),
            (
                5,
                WalCmd::CreateIndex {
                    db_name: "db1".into(),
                    table_name: "t1".into(),
                    index_def: IndexDef::new("idx").with(IndexBase::secondary("idx_f", vec!["v".into()])),
                    covered_segments: vec![0],
                },
            ),
            (
                7,
                WalCmd::Append {
                    db_name: "db1".into(),
                    table_name: "t1".into(),
                    block: rows(3),
                },
            ),
        ];
        for (ts, cmd) in &cmds {
            catalog.apply_cmd(cmd, Timestamp(*ts), buffer, None).unwrap();
        }
        catalog
    }

    #[test]
    fn capture_filters_later_commits() {
        let buffer = BufferManager::new(Arc::new(MemoryProvider::new()));
        let catalog = populated(&buffer);

        let snapshot = CatalogSnapshot::capture(&catalog, Timestamp(5));
        let table = &snapshot.databases[0].tables[0];
        assert_eq!(table.next_segment_id, 1);
        assert_eq!(table.segments.len(), 1);
        assert!(!table.segments[0].sealed);
        let rows: u32 = table.segments[0]
            .blocks
            .iter()
            .map(|b| b.ranges.last().map_or(0, |r| r.end_row))
            .sum();
        assert_eq!(rows, 3);
        assert_eq!(table.indexes.len(), 1);

        let full = CatalogSnapshot::capture(&catalog, Timestamp(7));
        assert!(full.databases[0].tables[0].segments[0].sealed);
        assert_eq!(full.databases[0].tables[0].next_segment_id, 2);
    }

    #[test]
    fn restore_then_replay_matches_live_catalog() {
        let buffer = BufferManager::new(Arc::new(MemoryProvider::new()));
        let live = populated(&buffer);
        let snapshot = CatalogSnapshot::capture(&live, Timestamp(5));

        let restored = snapshot.restore().unwrap();
        restored
            .apply_cmd(
                &WalCmd::Append {
                    db_name: "db1".into(),
                    table_name: "t1".into(),
                    block: rows(3),
                },
                Timestamp(7),
                &buffer,
                None,
            )
            .unwrap();

        assert_eq!(
            CatalogSnapshot::capture(&restored, Timestamp(7)),
            CatalogSnapshot::capture(&live, Timestamp(7))
        );
        let table = restored.get_table("db1", "t1", Timestamp(7)).unwrap();
        let chain = &table.index_meta_map()["idx"];
        assert_eq!(chain.entry_list().len(), 2);
        assert_eq!(
            table.get_segment_by_id(0, Timestamp(7)).unwrap().deprecate_ts(),
            UNCOMMIT_TS
        );
    }

    #[test]
    fn envelope_detects_corruption() {
        let buffer = BufferManager::new(Arc::new(MemoryProvider::new()));
        let snapshot = CatalogSnapshot::capture(&populated(&buffer), Timestamp(7));
        let mut data = snapshot.encode().unwrap();
        assert_eq!(CatalogSnapshot::decode(&data).unwrap(), snapshot);

        data[HEADER_SIZE] ^= 0x08;
        assert!(matches!(
            CatalogSnapshot::decode(&data),
            Err(CoreError::ChecksumMismatch { .. })
        ));
        assert!(CatalogSnapshot::decode(b"nope").is_err());
    }
}
