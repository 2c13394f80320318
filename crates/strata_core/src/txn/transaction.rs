//! Transactions: a fixed snapshot plus staged commands.

use super::conflict::{ConflictKey, LockMode};
use super::manager::CommitGate;
use super::state::TxnState;
use super::store::{Staged, TxnStore};
use crate::block_index::BlockIndex;
use crate::buffer::BufferManager;
use crate::catalog::{BlockLayout, Catalog, DatabaseEntry, IndexDef, TableDef, TableEntry};
use crate::data::DataBlock;
use crate::error::{CoreError, CoreResult};
use crate::types::{BlockId, ColumnId, ConflictType, SegmentId, Timestamp, TxnId};
use crate::wal::WalCmd;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_codec::Value;

/// A table as this transaction sees it.
enum TableRef {
    Committed(Arc<TableEntry>),
    Staged(TableDef),
}

impl TableRef {
    fn table_def(&self) -> &TableDef {
        match self {
            Self::Committed(table) => table.table_def(),
            Self::Staged(def) => def,
        }
    }
}

fn reject_replace(conflict_type: ConflictType) -> CoreResult<()> {
    if conflict_type == ConflictType::Replace {
        return Err(CoreError::not_supported("replace conflict policy"));
    }
    Ok(())
}

fn shared_db(db: &str) -> (ConflictKey, LockMode) {
    (ConflictKey::Database(db.to_string()), LockMode::Shared)
}

fn table_key(db: &str, table: &str, mode: LockMode) -> (ConflictKey, LockMode) {
    (ConflictKey::Table(db.to_string(), table.to_string()), mode)
}

/// A transaction.
///
/// Reads see the catalog as of [`Txn::begin_ts`] plus this transaction's
/// own staged DDL. Writes are staged and reach the catalog only through
/// [`TxnManager::commit_txn`](super::TxnManager::commit_txn).
pub struct Txn {
    txn_id: TxnId,
    begin_ts: Timestamp,
    commit_ts: AtomicU64,
    state: Mutex<TxnState>,
    store: Mutex<TxnStore>,
    catalog: Arc<Catalog>,
    buffer: Arc<BufferManager>,
    gate: Arc<CommitGate>,
    layout: BlockLayout,
}

impl Txn {
    pub(crate) fn new(
        begin_ts: Timestamp,
        catalog: Arc<Catalog>,
        buffer: Arc<BufferManager>,
        gate: Arc<CommitGate>,
        layout: BlockLayout,
    ) -> Self {
        Self {
            txn_id: TxnId(begin_ts.as_u64()),
            begin_ts,
            commit_ts: AtomicU64::new(0),
            state: Mutex::new(TxnState::Created),
            store: Mutex::new(TxnStore::new()),
            catalog,
            buffer,
            gate,
            layout,
        }
    }

    /// Transaction id.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Snapshot timestamp of every read.
    #[must_use]
    pub fn begin_ts(&self) -> Timestamp {
        self.begin_ts
    }

    /// Commit timestamp, once committed.
    #[must_use]
    pub fn commit_ts(&self) -> Option<Timestamp> {
        match self.commit_ts.load(Ordering::Acquire) {
            0 => None,
            ts => Some(Timestamp(ts)),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        *self.state.lock()
    }

    /// Whether nothing has been staged.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.store.lock().is_read_only()
    }

    /// Fixes the snapshot.
    ///
    /// Waits until every commit with a smaller timestamp is published, so
    /// the snapshot cannot change under the transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` unless the transaction was just created.
    pub fn begin(&self) -> CoreResult<()> {
        if self.state() != TxnState::Created {
            return Err(CoreError::invalid_operation(format!(
                "{} cannot begin: {}",
                self.txn_id,
                self.state()
            )));
        }
        self.gate.wait_published_before(self.begin_ts);
        self.transition(TxnState::Started)
    }

    pub(crate) fn transition(&self, next: TxnState) -> CoreResult<()> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return Err(CoreError::invalid_operation(format!(
                "{}: cannot go from {} to {next}",
                self.txn_id, *state
            )));
        }
        *state = next;
        Ok(())
    }

    pub(crate) fn buffer(&self) -> &Arc<BufferManager> {
        &self.buffer
    }

    pub(crate) fn take_store(&self) -> TxnStore {
        std::mem::take(&mut *self.store.lock())
    }

    pub(crate) fn set_commit_ts(&self, ts: Timestamp) {
        self.commit_ts.store(ts.as_u64(), Ordering::Release);
    }

    fn ensure_started(&self) -> CoreResult<()> {
        match self.state() {
            TxnState::Started => Ok(()),
            state => Err(CoreError::invalid_operation(format!(
                "{} is {state}, not started",
                self.txn_id
            ))),
        }
    }

    fn database_exists(&self, store: &TxnStore, db: &str) -> bool {
        match store.database(db) {
            Staged::Created(()) => true,
            Staged::Dropped => false,
            Staged::Unchanged => self.catalog.get_database(db, self.begin_ts).is_ok(),
        }
    }

    fn resolve_table(&self, store: &TxnStore, db: &str, table: &str) -> CoreResult<TableRef> {
        if !self.database_exists(store, db) {
            return Err(CoreError::DatabaseNotFound {
                name: db.to_string(),
            });
        }
        match store.table(db, table) {
            Staged::Created((def, _)) => Ok(TableRef::Staged(def)),
            Staged::Dropped => Err(CoreError::TableNotFound {
                db_name: db.to_string(),
                table_name: table.to_string(),
            }),
            Staged::Unchanged => Ok(TableRef::Committed(
                self.catalog.get_table(db, table, self.begin_ts)?,
            )),
        }
    }

    fn index_exists(&self, store: &TxnStore, db: &str, table: &TableRef, index: &str) -> bool {
        match store.index(db, &table.table_def().table_name, index) {
            Staged::Created(()) => true,
            Staged::Dropped => false,
            Staged::Unchanged => match table {
                TableRef::Committed(entry) => entry.get_index(index, self.begin_ts).is_some(),
                TableRef::Staged(_) => false,
            },
        }
    }

    /// Stages creation of database `db_name`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDatabase` if it exists and the policy is `Error`,
    /// `NotSupported` for `Replace`.
    pub fn create_database(&self, db_name: &str, conflict_type: ConflictType) -> CoreResult<()> {
        reject_replace(conflict_type)?;
        self.ensure_started()?;
        crate::catalog::validate_identifier("database", db_name)?;
        let mut store = self.store.lock();
        if self.database_exists(&store, db_name) {
            return match conflict_type {
                ConflictType::Ignore => Ok(()),
                _ => Err(CoreError::DuplicateDatabase {
                    name: db_name.to_string(),
                }),
            };
        }
        store.push(
            WalCmd::CreateDatabase {
                db_name: db_name.to_string(),
            },
            [(ConflictKey::Database(db_name.to_string()), LockMode::Exclusive)],
        );
        Ok(())
    }

    /// Stages dropping database `db_name` and its tables.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` if it is missing and the policy is `Error`.
    pub fn drop_database(&self, db_name: &str, conflict_type: ConflictType) -> CoreResult<()> {
        reject_replace(conflict_type)?;
        self.ensure_started()?;
        let mut store = self.store.lock();
        if !self.database_exists(&store, db_name) {
            return match conflict_type {
                ConflictType::Ignore => Ok(()),
                _ => Err(CoreError::DatabaseNotFound {
                    name: db_name.to_string(),
                }),
            };
        }
        store.push(
            WalCmd::DropDatabase {
                db_name: db_name.to_string(),
            },
            [(ConflictKey::Database(db_name.to_string()), LockMode::Exclusive)],
        );
        Ok(())
    }

    /// Stages creation of a table with the storage's default layout.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound`, `DuplicateTable` under `Error`, or a
    /// validation error for the definition.
    pub fn create_table(
        &self,
        db_name: &str,
        table_def: TableDef,
        conflict_type: ConflictType,
    ) -> CoreResult<()> {
        self.create_table_with_layout(db_name, table_def, self.layout, conflict_type)
    }

    /// Stages creation of a table with an explicit block layout.
    ///
    /// # Errors
    ///
    /// As [`Txn::create_table`], plus `InvalidOperation` for an empty layout.
    pub fn create_table_with_layout(
        &self,
        db_name: &str,
        table_def: TableDef,
        layout: BlockLayout,
        conflict_type: ConflictType,
    ) -> CoreResult<()> {
        reject_replace(conflict_type)?;
        self.ensure_started()?;
        table_def.validate()?;
        if layout.block_capacity == 0 || layout.segment_capacity == 0 {
            return Err(CoreError::invalid_operation("block layout must be non-empty"));
        }
        let mut store = self.store.lock();
        let table_name = table_def.table_name.clone();
        match self.resolve_table(&store, db_name, &table_name) {
            Ok(_) => {
                return match conflict_type {
                    ConflictType::Ignore => Ok(()),
                    _ => Err(CoreError::DuplicateTable {
                        db_name: db_name.to_string(),
                        table_name,
                    }),
                };
            }
            Err(CoreError::TableNotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        store.push(
            WalCmd::CreateTable {
                db_name: db_name.to_string(),
                table_def,
                layout,
            },
            [
                shared_db(db_name),
                table_key(db_name, &table_name, LockMode::Exclusive),
            ],
        );
        Ok(())
    }

    /// Stages dropping a table.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound`, or `TableNotFound` under `Error`.
    pub fn drop_table_by_name(
        &self,
        db_name: &str,
        table_name: &str,
        conflict_type: ConflictType,
    ) -> CoreResult<()> {
        reject_replace(conflict_type)?;
        self.ensure_started()?;
        let mut store = self.store.lock();
        match self.resolve_table(&store, db_name, table_name) {
            Ok(_) => {}
            Err(CoreError::TableNotFound { .. }) if conflict_type == ConflictType::Ignore => {
                return Ok(())
            }
            Err(e) => return Err(e),
        }
        store.push(
            WalCmd::DropTable {
                db_name: db_name.to_string(),
                table_name: table_name.to_string(),
            },
            [
                shared_db(db_name),
                table_key(db_name, table_name, LockMode::Exclusive),
            ],
        );
        Ok(())
    }

    /// Stages an index definition.
    ///
    /// The index covers the table's segments live at the snapshot; building
    /// it is left to the index builders.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIndex` under `Error`, a definition error, or the
    /// table lookup error.
    pub fn create_index_def(
        &self,
        db_name: &str,
        table_name: &str,
        index_def: IndexDef,
        conflict_type: ConflictType,
    ) -> CoreResult<()> {
        reject_replace(conflict_type)?;
        self.ensure_started()?;
        let mut store = self.store.lock();
        let table = self.resolve_table(&store, db_name, table_name)?;
        index_def.validate(&table.table_def().columns)?;
        if self.index_exists(&store, db_name, &table, &index_def.index_name) {
            return match conflict_type {
                ConflictType::Ignore => Ok(()),
                _ => Err(CoreError::DuplicateIndex {
                    table_name: table_name.to_string(),
                    index_name: index_def.index_name,
                }),
            };
        }
        let covered_segments = match &table {
            TableRef::Committed(entry) => entry
                .live_segments(self.begin_ts)
                .iter()
                .map(|s| s.segment_id())
                .collect(),
            TableRef::Staged(_) => Vec::new(),
        };
        let index_key = ConflictKey::Index(
            db_name.to_string(),
            table_name.to_string(),
            index_def.index_name.clone(),
        );
        store.push(
            WalCmd::CreateIndex {
                db_name: db_name.to_string(),
                table_name: table_name.to_string(),
                index_def,
                covered_segments,
            },
            [
                shared_db(db_name),
                table_key(db_name, table_name, LockMode::Shared),
                (index_key, LockMode::Exclusive),
            ],
        );
        Ok(())
    }

    /// Block index over the segments a staged index must cover.
    ///
    /// # Errors
    ///
    /// Returns `IndexNotFound` if this transaction staged no such index, or
    /// `InvalidOperation` if its table is also created by this transaction.
    pub fn create_index_prepare(
        &self,
        db_name: &str,
        table_name: &str,
        index_name: &str,
    ) -> CoreResult<BlockIndex> {
        self.ensure_started()?;
        let store = self.store.lock();
        let covered = store.cmds().iter().rev().find_map(|cmd| match cmd {
            WalCmd::CreateIndex {
                db_name: d,
                table_name: t,
                index_def,
                covered_segments,
            } if d == db_name && t == table_name && index_def.index_name == index_name => {
                Some(covered_segments.clone())
            }
            _ => None,
        });
        let Some(covered) = covered else {
            return Err(CoreError::IndexNotFound {
                table_name: table_name.to_string(),
                index_name: index_name.to_string(),
            });
        };
        let TableRef::Committed(table) = self.resolve_table(&store, db_name, table_name)? else {
            return Err(CoreError::invalid_operation(format!(
                "table {db_name}.{table_name} has no committed segments yet"
            )));
        };
        let mut index = BlockIndex::new();
        index.reserve(covered.len());
        for segment_id in covered {
            if let Some(segment) = table.get_segment_by_id(segment_id, self.begin_ts) {
                index.insert(&segment, self.begin_ts, true);
            }
        }
        Ok(index)
    }

    /// Stages dropping an index.
    ///
    /// # Errors
    ///
    /// Returns `IndexNotFound` under `Error`, or the table lookup error.
    pub fn drop_index(
        &self,
        db_name: &str,
        table_name: &str,
        index_name: &str,
        conflict_type: ConflictType,
    ) -> CoreResult<()> {
        reject_replace(conflict_type)?;
        self.ensure_started()?;
        let mut store = self.store.lock();
        let table = self.resolve_table(&store, db_name, table_name)?;
        if !self.index_exists(&store, db_name, &table, index_name) {
            return match conflict_type {
                ConflictType::Ignore => Ok(()),
                _ => Err(CoreError::IndexNotFound {
                    table_name: table_name.to_string(),
                    index_name: index_name.to_string(),
                }),
            };
        }
        let index_key = ConflictKey::Index(
            db_name.to_string(),
            table_name.to_string(),
            index_name.to_string(),
        );
        store.push(
            WalCmd::DropIndex {
                db_name: db_name.to_string(),
                table_name: table_name.to_string(),
                index_name: index_name.to_string(),
            },
            [
                shared_db(db_name),
                table_key(db_name, table_name, LockMode::Shared),
                (index_key, LockMode::Exclusive),
            ],
        );
        Ok(())
    }

    /// Stages rows for appending. Empty blocks are ignored.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the block does not fit the table, or the
    /// table lookup error.
    pub fn append(&self, db_name: &str, table_name: &str, block: DataBlock) -> CoreResult<()> {
        self.ensure_started()?;
        let mut store = self.store.lock();
        let table = self.resolve_table(&store, db_name, table_name)?;
        block.check_schema(&table.table_def().columns)?;
        if block.row_count() == 0 {
            return Ok(());
        }
        store.push(
            WalCmd::Append {
                db_name: db_name.to_string(),
                table_name: table_name.to_string(),
                block,
            },
            [shared_db(db_name), table_key(db_name, table_name, LockMode::Shared)],
        );
        Ok(())
    }

    /// Stages whole data blocks as one new sealed segment.
    ///
    /// # Errors
    ///
    /// As [`Txn::append`].
    pub fn import_segment(
        &self,
        db_name: &str,
        table_name: &str,
        blocks: Vec<DataBlock>,
    ) -> CoreResult<()> {
        self.ensure_started()?;
        let mut store = self.store.lock();
        let table = self.resolve_table(&store, db_name, table_name)?;
        for block in &blocks {
            block.check_schema(&table.table_def().columns)?;
        }
        let blocks: Vec<DataBlock> = blocks.into_iter().filter(|b| b.row_count() > 0).collect();
        if blocks.is_empty() {
            return Ok(());
        }
        store.push(
            WalCmd::Import {
                db_name: db_name.to_string(),
                table_name: table_name.to_string(),
                blocks,
            },
            [shared_db(db_name), table_key(db_name, table_name, LockMode::Shared)],
        );
        Ok(())
    }

    /// Stages replacing `inputs` with one segment holding `merged`.
    pub(crate) fn stage_compaction(
        &self,
        db_name: &str,
        table_name: &str,
        inputs: Vec<SegmentId>,
        merged: DataBlock,
    ) -> CoreResult<()> {
        self.ensure_started()?;
        let mut store = self.store.lock();
        if let TableRef::Staged(_) = self.resolve_table(&store, db_name, table_name)? {
            return Err(CoreError::invalid_operation(format!(
                "cannot compact {db_name}.{table_name} in the transaction creating it"
            )));
        }
        let row_count = merged.row_count() as u64;
        store.push_compaction(
            WalCmd::Compact {
                db_name: db_name.to_string(),
                table_name: table_name.to_string(),
                inputs,
                row_count,
            },
            merged,
            [shared_db(db_name), table_key(db_name, table_name, LockMode::Exclusive)],
        );
        Ok(())
    }

    /// Database names visible to this transaction, sorted.
    #[must_use]
    pub fn list_databases(&self) -> Vec<String> {
        let store = self.store.lock();
        let mut names: BTreeSet<String> = self
            .catalog
            .list_databases(self.begin_ts)
            .iter()
            .map(|db| db.db_name().to_string())
            .collect();
        for (name, exists) in store.database_changes() {
            if exists {
                names.insert(name.to_string());
            } else {
                names.remove(name);
            }
        }
        names.into_iter().collect()
    }

    /// Committed database visible to this transaction.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound`, or `InvalidOperation` if this
    /// transaction creates it.
    pub fn get_database(&self, db_name: &str) -> CoreResult<Arc<DatabaseEntry>> {
        match self.store.lock().database(db_name) {
            Staged::Created(()) => Err(CoreError::invalid_operation(format!(
                "database {db_name} is not committed yet"
            ))),
            Staged::Dropped => Err(CoreError::DatabaseNotFound {
                name: db_name.to_string(),
            }),
            Staged::Unchanged => self.catalog.get_database(db_name, self.begin_ts),
        }
    }

    /// Table names of `db_name` visible to this transaction, sorted.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound`.
    pub fn list_tables(&self, db_name: &str) -> CoreResult<Vec<String>> {
        let store = self.store.lock();
        if !self.database_exists(&store, db_name) {
            return Err(CoreError::DatabaseNotFound {
                name: db_name.to_string(),
            });
        }
        let mut names = BTreeSet::new();
        if store.database(db_name) == Staged::Unchanged {
            for table in self.catalog.get_database(db_name, self.begin_ts)?.list_tables(self.begin_ts) {
                names.insert(table.table_name().to_string());
            }
        }
        for (name, exists) in store.table_changes(db_name) {
            if exists {
                names.insert(name.to_string());
            } else {
                names.remove(name);
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Committed table visible to this transaction.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound`, `TableNotFound`, or `InvalidOperation`
    /// if this transaction creates the table.
    pub fn get_table_entry(&self, db_name: &str, table_name: &str) -> CoreResult<Arc<TableEntry>> {
        match self.resolve_table(&self.store.lock(), db_name, table_name)? {
            TableRef::Committed(table) => Ok(table),
            TableRef::Staged(_) => Err(CoreError::invalid_operation(format!(
                "table {db_name}.{table_name} is not committed yet"
            ))),
        }
    }

    /// Definition of a table, staged or committed.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` or `TableNotFound`.
    pub fn get_table_by_name(&self, db_name: &str, table_name: &str) -> CoreResult<TableDef> {
        Ok(self
            .resolve_table(&self.store.lock(), db_name, table_name)?
            .table_def()
            .clone())
    }

    /// Values of one block column visible to this transaction.
    ///
    /// # Errors
    ///
    /// Returns the first missing level: table, segment, block or column.
    pub fn read_block_column(
        &self,
        db_name: &str,
        table_name: &str,
        segment_id: SegmentId,
        block_id: BlockId,
        column_id: ColumnId,
    ) -> CoreResult<Vec<Value>> {
        let table = self.get_table_entry(db_name, table_name)?;
        let segment = table
            .get_segment_by_id(segment_id, self.begin_ts)
            .ok_or_else(|| CoreError::SegmentNotFound {
                table_name: table_name.to_string(),
                segment_id,
            })?;
        let block = segment
            .get_block_entry_by_id(block_id)
            .filter(|b| b.min_row_ts() <= self.begin_ts)
            .ok_or(CoreError::BlockNotFound {
                segment_id,
                block_id,
            })?;
        block.read_column(column_id, self.begin_ts, &self.buffer)
    }
}

impl fmt::Debug for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Txn")
            .field("txn_id", &self.txn_id)
            .field("begin_ts", &self.begin_ts)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
