//! Database entries.

use super::entry::{BaseEntry, CatalogEntry, EntryType, VersionChain};
use super::table::{BlockLayout, TableDef, TableEntry};
use crate::buffer::BufferManager;
use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A committed database version and its tables.
#[derive(Debug)]
pub struct DatabaseEntry {
    base: BaseEntry,
    db_name: String,
    dir: String,
    tables: RwLock<BTreeMap<String, Arc<VersionChain<TableEntry>>>>,
}

impl DatabaseEntry {
    pub(crate) fn new(db_name: &str, commit_ts: Timestamp) -> Self {
        Self::restore(db_name, format!("data/{db_name}_{}", commit_ts.as_u64()), commit_ts)
    }

    pub(crate) fn restore(db_name: &str, dir: String, commit_ts: Timestamp) -> Self {
        Self {
            base: BaseEntry::new(EntryType::Database, commit_ts),
            db_name: db_name.to_string(),
            dir,
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    /// Database name.
    #[must_use]
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Storage key prefix of the database's tables.
    #[must_use]
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Table visible at `ts`.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if no version is visible.
    pub fn get_table(&self, table_name: &str, ts: Timestamp) -> CoreResult<Arc<TableEntry>> {
        self.tables
            .read()
            .get(table_name)
            .and_then(|chain| chain.visible(ts))
            .ok_or_else(|| CoreError::TableNotFound {
                db_name: self.db_name.clone(),
                table_name: table_name.to_string(),
            })
    }

    /// Tables visible at `ts`, by name.
    #[must_use]
    pub fn list_tables(&self, ts: Timestamp) -> Vec<Arc<TableEntry>> {
        self.tables
            .read()
            .values()
            .filter_map(|chain| chain.visible(ts))
            .collect()
    }

    /// Version chain of a table name, dropped versions included.
    #[must_use]
    pub fn table_meta(&self, table_name: &str) -> Option<Arc<VersionChain<TableEntry>>> {
        self.tables.read().get(table_name).cloned()
    }

    fn chain(&self, table_name: &str) -> Arc<VersionChain<TableEntry>> {
        Arc::clone(
            self.tables
                .write()
                .entry(table_name.to_string())
                .or_default(),
        )
    }

    pub(crate) fn create_table(
        &self,
        def: TableDef,
        layout: BlockLayout,
        commit_ts: Timestamp,
    ) -> CoreResult<Arc<TableEntry>> {
        let chain = self.chain(&def.table_name);
        if chain.live().is_some() {
            return Err(CoreError::DuplicateTable {
                db_name: self.db_name.clone(),
                table_name: def.table_name,
            });
        }
        let table = Arc::new(TableEntry::new(&self.db_name, &self.dir, def, layout, commit_ts));
        chain.publish(Arc::clone(&table))?;
        Ok(table)
    }

    pub(crate) fn drop_table(&self, table_name: &str, commit_ts: Timestamp) -> CoreResult<()> {
        let chain = self.table_meta(table_name);
        match chain {
            Some(chain) if chain.deprecate(commit_ts)? => Ok(()),
            _ => Err(CoreError::TableNotFound {
                db_name: self.db_name.clone(),
                table_name: table_name.to_string(),
            }),
        }
    }

    pub(crate) fn restore_table(&self, table: Arc<TableEntry>) -> CoreResult<()> {
        self.chain(table.table_name()).publish(table)
    }

    /// Reclaims dropped tables and dead segments. Returns the number of
    /// tables and segments removed.
    pub(crate) fn collect_garbage(
        &self,
        oldest_ts: Timestamp,
        buffer: &BufferManager,
    ) -> CoreResult<(usize, usize)> {
        let chains: Vec<_> = self.tables.read().values().cloned().collect();
        let mut tables = 0;
        let mut segments = 0;
        for chain in chains {
            for table in chain.prune(oldest_ts) {
                buffer.remove_prefix(table.dir())?;
                tables += 1;
            }
            for table in chain.versions() {
                segments += table.collect_garbage(oldest_ts, buffer)?;
            }
        }
        self.tables.write().retain(|_, chain| !chain.is_vacant());
        Ok((tables, segments))
    }
}

impl CatalogEntry for DatabaseEntry {
    fn base(&self) -> &BaseEntry {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::table::ColumnDef;
    use strata_codec::LogicalType;

    fn def(name: &str) -> TableDef {
        TableDef::new(name, vec![ColumnDef::new(0, "v", LogicalType::Integer)])
    }

    const LAYOUT: BlockLayout = BlockLayout {
        block_capacity: 16,
        segment_capacity: 2,
    };

    #[test]
    fn table_lifecycle() {
        let db = DatabaseEntry::new("db1", Timestamp(1));
        assert_eq!(db.dir(), "data/db1_1");

        let table = db.create_table(def("t1"), LAYOUT, Timestamp(3)).unwrap();
        assert_eq!(table.dir(), "data/db1_1/t1_3");
        assert!(matches!(
            db.create_table(def("t1"), LAYOUT, Timestamp(4)),
            Err(CoreError::DuplicateTable { .. })
        ));

        assert!(db.get_table("t1", Timestamp(2)).is_err());
        assert_eq!(db.list_tables(Timestamp(3)).len(), 1);

        db.drop_table("t1", Timestamp(5)).unwrap();
        assert!(db.get_table("t1", Timestamp(5)).is_err());
        assert!(db.get_table("t1", Timestamp(4)).is_ok());
        assert!(db.drop_table("t1", Timestamp(6)).is_err());

        let again = db.create_table(def("t1"), LAYOUT, Timestamp(7)).unwrap();
        assert_eq!(again.dir(), "data/db1_1/t1_7");
        assert_eq!(db.table_meta("t1").unwrap().len(), 3);
    }

    #[test]
    fn garbage_collection_prunes_dropped_tables() {
        let db = DatabaseEntry::new("db1", Timestamp(1));
        let buffer = BufferManager::new(Arc::new(strata_storage::MemoryProvider::new()));
        db.create_table(def("t1"), LAYOUT, Timestamp(2)).unwrap();
        db.drop_table("t1", Timestamp(3)).unwrap();

        assert_eq!(db.collect_garbage(Timestamp(2), &buffer).unwrap(), (0, 0));
        assert_eq!(db.collect_garbage(Timestamp(3), &buffer).unwrap(), (1, 0));
        assert!(db.table_meta("t1").is_none());
    }
}
