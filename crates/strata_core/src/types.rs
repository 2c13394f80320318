//! Core type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical clock value ordering begins, commits and deprecations.
///
/// Begin and commit timestamps come from one monotonic counter, so a larger
/// timestamp always means "later".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

/// Deprecation timestamp of a version that is still live.
pub const UNCOMMIT_TS: Timestamp = Timestamp(u64::MAX);

impl Timestamp {
    /// The smallest timestamp; every committed version begins after it.
    pub const ZERO: Self = Self(0);

    /// Creates a timestamp.
    #[must_use]
    pub const fn new(ts: u64) -> Self {
        Self(ts)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is the live sentinel.
    #[must_use]
    pub const fn is_uncommitted(self) -> bool {
        self.0 == UNCOMMIT_TS.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_uncommitted() {
            write!(f, "ts:uncommitted")
        } else {
            write!(f, "ts:{}", self.0)
        }
    }
}

/// Unique identifier for a transaction.
///
/// Equal to the transaction's begin timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Dense per-table segment identifier.
pub type SegmentId = u32;

/// Block identifier within a segment.
pub type BlockId = u16;

/// Column position within a table definition.
pub type ColumnId = usize;

/// A block addressed across the whole table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GlobalBlockId {
    /// Owning segment.
    pub segment_id: SegmentId,
    /// Block within the segment.
    pub block_id: BlockId,
}

impl fmt::Display for GlobalBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_id, self.block_id)
    }
}

/// How DDL reacts when the object already exists (create) or is missing (drop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictType {
    /// Succeed without doing anything.
    Ignore,
    /// Fail with a duplicate / not-found error.
    Error,
    /// Replace the existing object. Rejected with `NotSupported`.
    Replace,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => write!(f, "ignore"),
            Self::Error => write!(f, "error"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_ordering() {
        let t1 = Timestamp::new(1);
        let t2 = Timestamp::new(2);
        assert!(t1 < t2);
        assert!(t2 < UNCOMMIT_TS);
        assert!(UNCOMMIT_TS.is_uncommitted());
        assert!(!t2.is_uncommitted());
    }

    #[test]
    fn display() {
        assert_eq!(Timestamp::new(42).to_string(), "ts:42");
        assert_eq!(UNCOMMIT_TS.to_string(), "ts:uncommitted");
        assert_eq!(TxnId(7).to_string(), "txn:7");
        let id = GlobalBlockId {
            segment_id: 3,
            block_id: 1,
        };
        assert_eq!(id.to_string(), "3:1");
    }
}
