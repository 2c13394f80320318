//! Transaction-local staging of catalog commands.

use super::conflict::{ConflictKey, LockMode, WriteSet};
use crate::catalog::{BlockLayout, TableDef};
use crate::data::DataBlock;
use crate::wal::WalCmd;
use std::collections::HashMap;

/// What the staged commands did to a named object.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Staged<T> {
    /// Not touched; the committed snapshot decides.
    Unchanged,
    /// Created by this transaction.
    Created(T),
    /// Dropped, or hidden by a drop of its parent.
    Dropped,
}

/// Commands a transaction will log and apply at commit, in order.
#[derive(Debug, Default)]
pub(crate) struct TxnStore {
    cmds: Vec<WalCmd>,
    merged: HashMap<usize, DataBlock>,
    write_set: WriteSet,
}

impl TxnStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stages a command holding `keys`.
    pub(crate) fn push(&mut self, cmd: WalCmd, keys: impl IntoIterator<Item = (ConflictKey, LockMode)>) {
        for (key, mode) in keys {
            self.write_set.add(key, mode);
        }
        self.cmds.push(cmd);
    }

    /// Stages a compaction whose rows are already merged.
    pub(crate) fn push_compaction(
        &mut self,
        cmd: WalCmd,
        merged: DataBlock,
        keys: impl IntoIterator<Item = (ConflictKey, LockMode)>,
    ) {
        self.merged.insert(self.cmds.len(), merged);
        self.push(cmd, keys);
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.cmds.is_empty()
    }

    pub(crate) fn cmds(&self) -> &[WalCmd] {
        &self.cmds
    }

    pub(crate) fn write_set(&self) -> &WriteSet {
        &self.write_set
    }

    /// Pre-merged rows of the command at `index`.
    pub(crate) fn merged(&self, index: usize) -> Option<&DataBlock> {
        self.merged.get(&index)
    }

    pub(crate) fn database(&self, db: &str) -> Staged<()> {
        self.cmds.iter().fold(Staged::Unchanged, |state, cmd| match cmd {
            WalCmd::CreateDatabase { db_name } if db_name == db => Staged::Created(()),
            WalCmd::DropDatabase { db_name } if db_name == db => Staged::Dropped,
            _ => state,
        })
    }

    pub(crate) fn table(&self, db: &str, table: &str) -> Staged<(TableDef, BlockLayout)> {
        self.cmds.iter().fold(Staged::Unchanged, |state, cmd| match cmd {
            WalCmd::CreateDatabase { db_name } | WalCmd::DropDatabase { db_name } if db_name == db => {
                Staged::Dropped
            }
            WalCmd::CreateTable {
                db_name,
                table_def,
                layout,
            } if db_name == db && table_def.table_name == table => {
                Staged::Created((table_def.clone(), *layout))
            }
            WalCmd::DropTable {
                db_name,
                table_name,
            } if db_name == db && table_name == table => Staged::Dropped,
            _ => state,
        })
    }

    pub(crate) fn index(&self, db: &str, table: &str, index: &str) -> Staged<()> {
        let same_table = |d: &str, t: &str| d == db && t == table;
        self.cmds.iter().fold(Staged::Unchanged, |state, cmd| match cmd {
            WalCmd::CreateDatabase { db_name } | WalCmd::DropDatabase { db_name } if db_name == db => {
                Staged::Dropped
            }
            WalCmd::CreateTable {
                db_name, table_def, ..
            } if same_table(db_name, &table_def.table_name) => Staged::Dropped,
            WalCmd::DropTable {
                db_name,
                table_name,
            } if same_table(db_name, table_name) => Staged::Dropped,
            WalCmd::CreateIndex {
                db_name,
                table_name,
                index_def,
                ..
            } if same_table(db_name, table_name) && index_def.index_name == index => {
                Staged::Created(())
            }
            WalCmd::DropIndex {
                db_name,
                table_name,
                index_name,
            } if same_table(db_name, table_name) && index_name == index => Staged::Dropped,
            _ => state,
        })
    }

    /// Names of databases created (`true`) or dropped (`false`) by the
    /// staged commands, last command winning.
    pub(crate) fn database_changes(&self) -> HashMap<&str, bool> {
        let mut changes = HashMap::new();
        for cmd in &self.cmds {
            match cmd {
                WalCmd::CreateDatabase { db_name } => {
                    changes.insert(db_name.as_str(), true);
                }
                WalCmd::DropDatabase { db_name } => {
                    changes.insert(db_name.as_str(), false);
                }
                _ => {}
            }
        }
        changes
    }

    /// Names of tables of `db` created or dropped by the staged commands.
    pub(crate) fn table_changes(&self, db: &str) -> HashMap<&str, bool> {
        let mut changes = HashMap::new();
        for cmd in &self.cmds {
            match cmd {
                WalCmd::CreateTable {
                    db_name, table_def, ..
                } if db_name == db => {
                    changes.insert(table_def.table_name.as_str(), true);
                }
                WalCmd::DropTable {
                    db_name,
                    table_name,
                } if db_name == db => {
                    changes.insert(table_name.as_str(), false);
                }
                WalCmd::CreateDatabase { db_name } | WalCmd::DropDatabase { db_name }
                    if db_name == db =>
                {
                    changes.values_mut().for_each(|exists| *exists = false);
                }
                _ => {}
            }
        }
        changes
    }
}
