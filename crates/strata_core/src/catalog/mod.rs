//! The versioned catalog.
//!
//! The catalog owns the Database → Table → Segment → Block → Column
//! hierarchy. Databases, tables and indexes are named objects held in
//! [`VersionChain`]s; segments and blocks hang off the table version that
//! created them and carry their own visibility timestamps.
//!
//! Mutations only arrive through [`Catalog::apply_cmd`], which is shared by
//! commit and WAL replay so both derive the same segment ids and directory
//! names.

mod block;
mod database;
mod entry;
mod index;
mod segment;
mod table;

pub use block::{BlockColumnEntry, BlockEntry, RowRange};
pub use database::DatabaseEntry;
pub use entry::{BaseEntry, CatalogEntry, EntryType, VersionChain, VersionNode};
pub use index::{
    HnswEncode, IndexBase, IndexDef, IndexKind, InitParameter, MetricType, TableIndexEntry,
};
pub use segment::SegmentEntry;
pub use table::{BlockLayout, ColumnDef, TableDef, TableEntry};

use crate::buffer::BufferManager;
use crate::data::DataBlock;
use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use crate::wal::WalCmd;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Longest accepted database, table, column or index name.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Checks that `name` is `[A-Za-z_][A-Za-z0-9_]*` and not too long.
///
/// Names become storage keys, so anything else is rejected.
///
/// # Errors
///
/// Returns `InvalidOperation` naming the `kind` of object.
pub fn validate_identifier(kind: &str, name: &str) -> CoreResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid || name.len() > MAX_IDENTIFIER_LEN {
        return Err(CoreError::invalid_operation(format!(
            "invalid {kind} name {name:?}"
        )));
    }
    Ok(())
}

/// What a garbage-collection pass reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcSummary {
    /// Database versions removed.
    pub databases: usize,
    /// Table versions removed.
    pub tables: usize,
    /// Segments removed.
    pub segments: usize,
}

/// Root of the catalog: database name → version chain.
#[derive(Debug, Default)]
pub struct Catalog {
    databases: RwLock<BTreeMap<String, Arc<VersionChain<DatabaseEntry>>>>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Database visible at `ts`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` if no version is visible.
    pub fn get_database(&self, db_name: &str, ts: Timestamp) -> CoreResult<Arc<DatabaseEntry>> {
        self.databases
            .read()
            .get(db_name)
            .and_then(|chain| chain.visible(ts))
            .ok_or_else(|| CoreError::DatabaseNotFound {
                name: db_name.to_string(),
            })
    }

    /// Databases visible at `ts`, by name.
    #[must_use]
    pub fn list_databases(&self, ts: Timestamp) -> Vec<Arc<DatabaseEntry>> {
        self.databases
            .read()
            .values()
            .filter_map(|chain| chain.visible(ts))
            .collect()
    }

    /// Version chain of a database name, dropped versions included.
    #[must_use]
    pub fn database_meta(&self, db_name: &str) -> Option<Arc<VersionChain<DatabaseEntry>>> {
        self.databases.read().get(db_name).cloned()
    }

    /// Table visible at `ts`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` or `TableNotFound`.
    pub fn get_table(
        &self,
        db_name: &str,
        table_name: &str,
        ts: Timestamp,
    ) -> CoreResult<Arc<TableEntry>> {
        self.get_database(db_name, ts)?.get_table(table_name, ts)
    }

    fn chain(&self, db_name: &str) -> Arc<VersionChain<DatabaseEntry>> {
        Arc::clone(
            self.databases
                .write()
                .entry(db_name.to_string())
                .or_default(),
        )
    }

    /// Applies one committed command at `commit_ts`.
    ///
    /// `merged` carries rows a compaction task already merged; replay passes
    /// `None` and the rows are re-read from the inputs.
    pub(crate) fn apply_cmd(
        &self,
        cmd: &WalCmd,
        commit_ts: Timestamp,
        buffer: &BufferManager,
        merged: Option<&DataBlock>,
    ) -> CoreResult<()> {
        match cmd {
            WalCmd::CreateDatabase { db_name } => {
                let chain = self.chain(db_name);
                if chain.live().is_some() {
                    return Err(CoreError::DuplicateDatabase {
                        name: db_name.clone(),
                    });
                }
                chain.publish(Arc::new(DatabaseEntry::new(db_name, commit_ts)))?;
            }
            WalCmd::DropDatabase { db_name } => {
                let dropped = match self.database_meta(db_name) {
                    Some(chain) => chain.deprecate(commit_ts)?,
                    None => false,
                };
                if !dropped {
                    return Err(CoreError::DatabaseNotFound {
                        name: db_name.clone(),
                    });
                }
            }
            WalCmd::CreateTable {
                db_name,
                table_def,
                layout,
            } => {
                self.get_database(db_name, commit_ts)?
                    .create_table(table_def.clone(), *layout, commit_ts)?;
            }
            WalCmd::DropTable {
                db_name,
                table_name,
            } => {
                self.get_database(db_name, commit_ts)?
                    .drop_table(table_name, commit_ts)?;
            }
            WalCmd::Append {
                db_name,
                table_name,
                block,
            } => {
                self.get_table(db_name, table_name, commit_ts)?
                    .append(block, commit_ts, buffer)?;
            }
            WalCmd::Import {
                db_name,
                table_name,
                blocks,
            } => {
                self.get_table(db_name, table_name, commit_ts)?
                    .import_segment(blocks, commit_ts, buffer)?;
            }
            WalCmd::CreateIndex {
                db_name,
                table_name,
                index_def,
                covered_segments,
            } => {
                self.get_table(db_name, table_name, commit_ts)?.create_index(
                    index_def.clone(),
                    covered_segments.clone(),
                    commit_ts,
                )?;
            }
            WalCmd::DropIndex {
                db_name,
                table_name,
                index_name,
            } => {
                self.get_table(db_name, table_name, commit_ts)?
                    .drop_index(index_name, commit_ts)?;
            }
            WalCmd::Compact {
                db_name,
                table_name,
                inputs,
                row_count,
            } => {
                self.get_table(db_name, table_name, commit_ts)?.compact(
                    inputs,
                    *row_count,
                    merged,
                    commit_ts,
                    buffer,
                )?;
            }
        }
        debug!(cmd = cmd.name(), %commit_ts, "applied command");
        Ok(())
    }

    pub(crate) fn restore_database(&self, database: Arc<DatabaseEntry>) -> CoreResult<()> {
        self.chain(database.db_name()).publish(database)
    }

    /// Reclaims every version, segment and column file that no snapshot at
    /// or after `oldest_ts` can reach.
    pub(crate) fn collect_garbage(
        &self,
        oldest_ts: Timestamp,
        buffer: &BufferManager,
    ) -> CoreResult<GcSummary> {
        let chains: Vec<_> = self.databases.read().values().cloned().collect();
        let mut summary = GcSummary::default();
        for chain in chains {
            for database in chain.prune(oldest_ts) {
                buffer.remove_prefix(database.dir())?;
                summary.databases += 1;
            }
            for database in chain.versions() {
                let (tables, segments) = database.collect_garbage(oldest_ts, buffer)?;
                summary.tables += tables;
                summary.segments += segments;
            }
        }
        self.databases.write().retain(|_, chain| !chain.is_vacant());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_codec::{LogicalType, Value};
    use strata_storage::MemoryProvider;

    fn buffer() -> BufferManager {
        BufferManager::new(Arc::new(MemoryProvider::new()))
    }

    fn create_db(name: &str) -> WalCmd {
        WalCmd::CreateDatabase {
            db_name: name.to_string(),
        }
    }

    #[test]
    fn identifiers() {
        for ok in ["db1", "_tmp", "Table_2"] {
            validate_identifier("table", ok).unwrap();
        }
        for bad in ["", "1db", "a-b", "a/b", "..", "a b"] {
            assert!(validate_identifier("table", bad).is_err(), "{bad}");
        }
        assert!(validate_identifier("db", &"x".repeat(65)).is_err());
    }

    #[test]
    fn database_create_drop_recreate() {
        let catalog = Catalog::new();
        let buffer = buffer();
        catalog.apply_cmd(&create_db("db1"), Timestamp(2), &buffer, None).unwrap();
        assert!(matches!(
            catalog.apply_cmd(&create_db("db1"), Timestamp(3), &buffer, None),
            Err(CoreError::DuplicateDatabase { .. })
        ));

        let drop = WalCmd::DropDatabase {
            db_name: "db1".into(),
        };
        catalog.apply_cmd(&drop, Timestamp(4), &buffer, None).unwrap();
        assert!(catalog.get_database("db1", Timestamp(4)).is_err());
        assert!(catalog.get_database("db1", Timestamp(3)).is_ok());
        assert!(catalog.apply_cmd(&drop, Timestamp(5), &buffer, None).is_err());

        catalog.apply_cmd(&create_db("db1"), Timestamp(6), &buffer, None).unwrap();
        let list = catalog.database_meta("db1").unwrap().entry_list();
        assert_eq!(list.len(), 3);
        assert_eq!(list[2].entry_type(), EntryType::Dummy);
        assert_eq!(catalog.list_databases(Timestamp(6)).len(), 1);
    }

    #[test]
    fn table_commands_in_one_commit() {
        let catalog = Catalog::new();
        let buffer = buffer();
        let def = TableDef::new("t1", vec![ColumnDef::new(0, "v", LogicalType::BigInt)]);
        let mut block = DataBlock::new(&[LogicalType::BigInt]);
        block.append_row(vec![Value::BigInt(22)]).unwrap();

        let cmds = [
            create_db("db1"),
            WalCmd::CreateTable {
                db_name: "db1".into(),
                table_def: def,
                layout: BlockLayout {
                    block_capacity: 4,
                    segment_capacity: 2,
                },
            },
            WalCmd::Append {
                db_name: "db1".into(),
                table_name: "t1".into(),
                block,
            },
        ];
        for cmd in &cmds {
            catalog.apply_cmd(cmd, Timestamp(3), &buffer, None).unwrap();
        }
        let table = catalog.get_table("db1", "t1", Timestamp(3)).unwrap();
        assert_eq!(table.row_count(Timestamp(3)), 1);
        assert!(catalog.get_table("db1", "t1", Timestamp(2)).is_err());
    }

    #[test]
    fn garbage_collection_drops_dead_databases() {
        let catalog = Catalog::new();
        let buffer = buffer();
        catalog.apply_cmd(&create_db("db1"), Timestamp(2), &buffer, None).unwrap();
        catalog
            .apply_cmd(
                &WalCmd::DropDatabase {
                    db_name: "db1".into(),
                },
                Timestamp(3),
                &buffer,
                None,
            )
            .unwrap();

        let summary = catalog.collect_garbage(Timestamp(3), &buffer).unwrap();
        assert_eq!(summary.databases, 1);
        assert!(catalog.database_meta("db1").is_none());
    }
}
