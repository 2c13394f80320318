//! Test fixtures and storage helpers.
//!
//! Provides a storage that lives in a temporary directory and can be
//! restarted in place, plus the tables and blocks most tests use.

use std::ops::Deref;
use std::path::Path;
use strata_codec::{LogicalType, Value};
use strata_core::{
    ColumnDef, ColumnVector, Config, CoreResult, DataBlock, Storage, TableDef, Timestamp, Txn,
};
use tempfile::TempDir;

/// A test storage with automatic cleanup.
///
/// Dereferences to the open [`Storage`]. [`TestStorage::reopen`] closes it
/// and recovers it from the same directory, which is how tests simulate a
/// restart.
pub struct TestStorage {
    storage: Option<Storage>,
    config: Config,
    // Declared last so the storage closes before the directory is removed.
    temp_dir: TempDir,
}

impl TestStorage {
    /// Opens a fresh storage with WAL syncing turned off.
    pub fn new() -> Self {
        Self::with_config(Config::default().sync_on_commit(false))
    }

    /// Opens a fresh storage with `config`.
    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage = Storage::open(temp_dir.path(), config.clone()).expect("Failed to open storage");
        Self {
            storage: Some(storage),
            config,
            temp_dir,
        }
    }

    /// Storage root.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Configuration used for every open.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Closes the storage and opens it again from disk.
    pub fn reopen(&mut self) {
        self.close();
        self.open();
    }

    /// Closes the storage, leaving its files for inspection or damage.
    pub fn close(&mut self) {
        if let Some(storage) = self.storage.take() {
            storage.close().expect("Failed to close storage");
        }
    }

    /// Opens the storage after [`TestStorage::close`].
    pub fn open(&mut self) {
        self.storage = Some(self.try_open().expect("Failed to reopen storage"));
    }

    /// Opens the storage after [`TestStorage::close`], returning the error.
    pub fn try_open(&self) -> CoreResult<Storage> {
        Storage::open(self.temp_dir.path(), self.config.clone())
    }
}

impl Default for TestStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestStorage {
    type Target = Storage;

    fn deref(&self) -> &Self::Target {
        self.storage.as_ref().expect("storage is closed")
    }
}

/// Runs `f` in a new transaction and commits it, rolling back on error.
pub fn commit_with<F>(storage: &Storage, f: F) -> CoreResult<Timestamp>
where
    F: FnOnce(&Txn) -> CoreResult<()>,
{
    let txn = storage.begin_txn()?;
    match f(&txn) {
        Ok(()) => storage.commit(&txn),
        Err(e) => {
            storage.rollback(&txn)?;
            Err(e)
        }
    }
}

/// Databases visible to a new transaction.
pub fn list_databases(storage: &Storage) -> Vec<String> {
    let txn = storage.begin_txn().expect("Failed to begin");
    let names = txn.list_databases();
    storage.rollback(&txn).expect("Failed to roll back");
    names
}

/// Rows of a table visible to a new transaction.
pub fn table_row_count(storage: &Storage, db_name: &str, table_name: &str) -> u64 {
    let txn = storage.begin_txn().expect("Failed to begin");
    let rows = txn
        .get_table_entry(db_name, table_name)
        .expect("table not found")
        .row_count(txn.begin_ts());
    storage.rollback(&txn).expect("Failed to roll back");
    rows
}

/// A table with one `Integer` column `v`.
pub fn int_table(name: &str) -> TableDef {
    TableDef::new(name, vec![ColumnDef::new(0, "v", LogicalType::Integer)])
}

/// A block for [`int_table`].
pub fn int_block(values: &[i32]) -> DataBlock {
    let column = ColumnVector::with_values(
        LogicalType::Integer,
        values.iter().copied().map(Value::from).collect(),
    )
    .expect("integer column");
    DataBlock::from_columns(vec![column]).expect("single column block")
}

/// A table with columns `c1 TinyInt`, `c2 BigInt`, `c3 Double`.
pub fn typed_table(name: &str) -> TableDef {
    TableDef::new(
        name,
        vec![
            ColumnDef::new(0, "c1", LogicalType::TinyInt),
            ColumnDef::new(1, "c2", LogicalType::BigInt),
            ColumnDef::new(2, "c3", LogicalType::Double),
        ],
    )
}

/// A block for [`typed_table`], one row per tuple.
pub fn typed_block(rows: &[(i8, i64, f64)]) -> DataBlock {
    let mut block = DataBlock::new(&[LogicalType::TinyInt, LogicalType::BigInt, LogicalType::Double]);
    for &(a, b, c) in rows {
        block
            .append_row(vec![a.into(), b.into(), c.into()])
            .expect("typed row");
    }
    block
}
