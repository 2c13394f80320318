//! Versioned catalog entries and their version chains.
//!
//! Every named catalog object is a [`VersionChain`]: committed versions
//! ordered newest-first and terminated by a [`EntryType::Dummy`] tombstone
//! meaning "did not exist before the version above it". Versions are never
//! changed in place except for their deprecation timestamp, which is set once
//! when the version is superseded or dropped.
//!
//! A reader at timestamp `ts` sees the first node whose `begin_ts <= ts`,
//! provided it is not the tombstone and `ts < deprecate_ts`.

use crate::error::{CoreError, CoreResult};
use crate::types::{Timestamp, UNCOMMIT_TS};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Kind of catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// A database.
    Database,
    /// A table.
    Table,
    /// A segment of a table.
    Segment,
    /// A block of a segment.
    Block,
    /// A column of a block.
    Column,
    /// An index on a table.
    TableIndex,
    /// Tombstone terminating a version chain.
    Dummy,
}

/// Visibility metadata shared by every entry.
#[derive(Debug)]
pub struct BaseEntry {
    entry_type: EntryType,
    begin_ts: Timestamp,
    deprecate_ts: AtomicU64,
}

impl BaseEntry {
    /// Creates live metadata for a version committed at `begin_ts`.
    #[must_use]
    pub fn new(entry_type: EntryType, begin_ts: Timestamp) -> Self {
        Self {
            entry_type,
            begin_ts,
            deprecate_ts: AtomicU64::new(UNCOMMIT_TS.as_u64()),
        }
    }

    fn dummy(until: Timestamp) -> Self {
        Self {
            entry_type: EntryType::Dummy,
            begin_ts: Timestamp::ZERO,
            deprecate_ts: AtomicU64::new(until.as_u64()),
        }
    }

    /// Entry kind.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// Timestamp from which this version is visible.
    #[must_use]
    pub fn begin_ts(&self) -> Timestamp {
        self.begin_ts
    }

    /// Timestamp at which this version was committed.
    ///
    /// Versions are published at their commit, so this equals `begin_ts`.
    #[must_use]
    pub fn commit_ts(&self) -> Timestamp {
        self.begin_ts
    }

    /// Timestamp at which this version stopped being live, or [`UNCOMMIT_TS`].
    #[must_use]
    pub fn deprecate_ts(&self) -> Timestamp {
        Timestamp(self.deprecate_ts.load(Ordering::Acquire))
    }

    /// Whether this is a tombstone.
    #[must_use]
    pub fn is_dummy(&self) -> bool {
        self.entry_type == EntryType::Dummy
    }

    /// Whether the version has been superseded or dropped.
    #[must_use]
    pub fn is_deprecated(&self) -> bool {
        !self.deprecate_ts().is_uncommitted()
    }

    /// Whether a reader at `ts` sees this version.
    #[must_use]
    pub fn is_visible(&self, ts: Timestamp) -> bool {
        !self.is_dummy() && self.begin_ts <= ts && ts < self.deprecate_ts()
    }

    /// Marks the version as no longer live from `ts` on.
    ///
    /// # Errors
    ///
    /// Returns `Unrecoverable` if it is already deprecated or `ts` precedes
    /// its begin.
    pub(crate) fn deprecate(&self, ts: Timestamp) -> CoreResult<()> {
        if ts < self.begin_ts {
            return Err(CoreError::unrecoverable(format!(
                "deprecating {:?} at {ts} before its begin {}",
                self.entry_type, self.begin_ts
            )));
        }
        self.deprecate_ts
            .compare_exchange(
                UNCOMMIT_TS.as_u64(),
                ts.as_u64(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|prev| {
                CoreError::unrecoverable(format!(
                    "{:?} already deprecated at {}",
                    self.entry_type,
                    Timestamp(prev)
                ))
            })
    }
}

/// An entry that carries [`BaseEntry`] metadata.
pub trait CatalogEntry: Send + Sync {
    /// Visibility metadata.
    fn base(&self) -> &BaseEntry;
}

/// One node of a version chain.
pub enum VersionNode<T> {
    /// A committed version.
    Live(Arc<T>),
    /// The tombstone at the tail.
    Dummy(Arc<BaseEntry>),
}

impl<T> Clone for VersionNode<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Live(entry) => Self::Live(Arc::clone(entry)),
            Self::Dummy(base) => Self::Dummy(Arc::clone(base)),
        }
    }
}

impl<T: CatalogEntry> VersionNode<T> {
    /// Visibility metadata of the node.
    #[must_use]
    pub fn base(&self) -> &BaseEntry {
        match self {
            Self::Live(entry) => entry.base(),
            Self::Dummy(base) => base,
        }
    }

    /// Entry kind of the node.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        self.base().entry_type()
    }

    /// The version, unless this is the tombstone.
    #[must_use]
    pub fn as_live(&self) -> Option<&Arc<T>> {
        match self {
            Self::Live(entry) => Some(entry),
            Self::Dummy(_) => None,
        }
    }
}

impl<T: CatalogEntry> fmt::Debug for VersionNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.base();
        f.debug_struct("VersionNode")
            .field("entry_type", &base.entry_type())
            .field("begin_ts", &base.begin_ts())
            .field("deprecate_ts", &base.deprecate_ts())
            .finish()
    }
}

/// Committed versions of one named object, newest first.
pub struct VersionChain<T> {
    nodes: RwLock<VecDeque<VersionNode<T>>>,
}

impl<T> Default for VersionChain<T> {
    fn default() -> Self {
        Self {
            nodes: RwLock::new(VecDeque::new()),
        }
    }
}

impl<T: CatalogEntry> VersionChain<T> {
    /// Creates a chain with no versions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The version visible at `ts`.
    #[must_use]
    pub fn visible(&self, ts: Timestamp) -> Option<Arc<T>> {
        let nodes = self.nodes.read();
        let node = nodes.iter().find(|node| node.base().begin_ts() <= ts)?;
        match node {
            VersionNode::Live(entry) if ts < entry.base().deprecate_ts() => Some(Arc::clone(entry)),
            _ => None,
        }
    }

    /// The newest version if it has not been dropped.
    #[must_use]
    pub fn live(&self) -> Option<Arc<T>> {
        match self.nodes.read().front() {
            Some(VersionNode::Live(entry)) if !entry.base().is_deprecated() => {
                Some(Arc::clone(entry))
            }
            _ => None,
        }
    }

    /// Publishes a new head version.
    ///
    /// The previous head, if still live, is deprecated at the new version's
    /// begin timestamp. The first publish installs the tombstone tail.
    ///
    /// # Errors
    ///
    /// Returns `Unrecoverable` if the new version does not begin after the
    /// current head.
    pub fn publish(&self, entry: Arc<T>) -> CoreResult<()> {
        let begin_ts = entry.base().begin_ts();
        let mut nodes = self.nodes.write();
        match nodes.front() {
            None => nodes.push_back(VersionNode::Dummy(Arc::new(BaseEntry::dummy(begin_ts)))),
            Some(head) => {
                let head = head.base();
                if head.begin_ts() > begin_ts {
                    return Err(CoreError::unrecoverable(format!(
                        "publishing version at {begin_ts} below head at {}",
                        head.begin_ts()
                    )));
                }
                if !head.is_dummy() && !head.is_deprecated() {
                    head.deprecate(begin_ts)?;
                }
            }
        }
        nodes.push_front(VersionNode::Live(entry));
        Ok(())
    }

    /// Logically drops the live head at `ts`.
    ///
    /// Returns `false` if there is no live head.
    ///
    /// # Errors
    ///
    /// Returns `Unrecoverable` if `ts` precedes the head's begin.
    pub fn deprecate(&self, ts: Timestamp) -> CoreResult<bool> {
        let nodes = self.nodes.read();
        match nodes.front() {
            Some(VersionNode::Live(entry)) if !entry.base().is_deprecated() => {
                entry.base().deprecate(ts)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Snapshot of every node, newest first.
    #[must_use]
    pub fn entry_list(&self) -> Vec<VersionNode<T>> {
        self.nodes.read().iter().cloned().collect()
    }

    /// Every committed version still in the chain, newest first.
    #[must_use]
    pub fn versions(&self) -> Vec<Arc<T>> {
        self.nodes
            .read()
            .iter()
            .filter_map(|node| node.as_live().cloned())
            .collect()
    }

    /// Number of nodes, tombstone included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether nothing was ever published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Whether only the tombstone remains.
    #[must_use]
    pub fn is_vacant(&self) -> bool {
        self.nodes
            .read()
            .iter()
            .all(|node| matches!(node, VersionNode::Dummy(_)))
    }

    /// Drops versions that stopped being live at or before `oldest_ts`.
    ///
    /// No snapshot at or after `oldest_ts` can see them. Returns the removed
    /// versions so their storage can be reclaimed.
    pub fn prune(&self, oldest_ts: Timestamp) -> Vec<Arc<T>> {
        let mut nodes = self.nodes.write();
        let mut removed = Vec::new();
        nodes.retain(|node| match node {
            VersionNode::Live(entry) if entry.base().deprecate_ts() <= oldest_ts => {
                removed.push(Arc::clone(entry));
                false
            }
            _ => true,
        });
        removed
    }
}

impl<T: CatalogEntry> fmt::Debug for VersionChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.nodes.read().iter()).finish()
    }
}
