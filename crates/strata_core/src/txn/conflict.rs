//! Write-set conflict detection.
//!
//! Each write transaction records the catalog objects it touches as
//! [`ConflictKey`]s held in shared or exclusive mode. Two commits conflict
//! when they share a key and at least one holds it exclusively. A commit is
//! validated against every commit newer than its begin timestamp.

use crate::types::{Timestamp, TxnId};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// A catalog object a transaction writes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConflictKey {
    /// A database name.
    Database(String),
    /// A table name within a database.
    Table(String, String),
    /// An index name within a table.
    Index(String, String, String),
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(db) => write!(f, "database {db}"),
            Self::Table(db, table) => write!(f, "table {db}.{table}"),
            Self::Index(db, table, index) => write!(f, "index {db}.{table}.{index}"),
        }
    }
}

/// How a key is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    /// Compatible with other shared holders.
    Shared,
    /// Incompatible with every other holder.
    Exclusive,
}

/// The keys a transaction writes, each at its strongest mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    keys: BTreeMap<ConflictKey, LockMode>,
}

impl WriteSet {
    /// Creates an empty write set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key`, upgrading it if already held in a weaker mode.
    pub fn add(&mut self, key: ConflictKey, mode: LockMode) {
        let held = self.keys.entry(key).or_insert(mode);
        *held = (*held).max(mode);
    }

    /// Whether nothing is written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Every key, in key order.
    pub fn keys(&self) -> impl Iterator<Item = &ConflictKey> {
        self.keys.keys()
    }

    /// Mode `key` is held in.
    #[must_use]
    pub fn mode(&self, key: &ConflictKey) -> Option<LockMode> {
        self.keys.get(key).copied()
    }

    /// First key both sets hold with at least one exclusive holder.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> Option<&ConflictKey> {
        self.keys.iter().find_map(|(key, mode)| match other.keys.get(key) {
            Some(theirs) if *mode == LockMode::Exclusive || *theirs == LockMode::Exclusive => {
                Some(key)
            }
            _ => None,
        })
    }
}

struct CommittedWrites {
    commit_ts: Timestamp,
    txn_id: TxnId,
    write_set: WriteSet,
}

/// Write sets of recent commits, oldest first.
#[derive(Default)]
pub(crate) struct CommitHistory {
    commits: VecDeque<CommittedWrites>,
}

impl CommitHistory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Finds a commit after `begin_ts` that conflicts with `write_set`.
    pub(crate) fn find_conflict(
        &self,
        begin_ts: Timestamp,
        write_set: &WriteSet,
    ) -> Option<(TxnId, ConflictKey)> {
        self.commits
            .iter()
            .rev()
            .take_while(|c| c.commit_ts > begin_ts)
            .find_map(|c| {
                write_set
                    .conflicts_with(&c.write_set)
                    .map(|key| (c.txn_id, key.clone()))
            })
    }

    /// Records a commit. Commits arrive in timestamp order.
    pub(crate) fn record(&mut self, commit_ts: Timestamp, txn_id: TxnId, write_set: WriteSet) {
        self.commits.push_back(CommittedWrites {
            commit_ts,
            txn_id,
            write_set,
        });
    }

    /// Forgets commits no active or future transaction can conflict with.
    pub(crate) fn prune(&mut self, oldest_begin_ts: Timestamp) {
        while self
            .commits
            .front()
            .is_some_and(|c| c.commit_ts <= oldest_begin_ts)
        {
            self.commits.pop_front();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.commits.len()
    }
}
