//! Storage statistics.
//!
//! Counters for monitoring transaction, WAL and maintenance activity.
//!
//! # Usage
//!
//! ```rust,ignore
//! use strata_core::Storage;
//!
//! let storage = Storage::open_in_memory()?;
//! // ... commit some transactions ...
//! let stats = storage.stats().snapshot();
//! println!("committed: {}", stats.txns_committed);
//! println!("conflicts: {}", stats.conflicts);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Storage statistics.
///
/// All counters are atomic and can be read while operations are in progress.
/// Values only increase.
#[derive(Debug, Default)]
pub struct StorageStats {
    // Transaction counters
    /// Transactions started.
    txns_started: AtomicU64,
    /// Transactions committed.
    txns_committed: AtomicU64,
    /// Transactions rolled back, conflicts included.
    txns_rolled_back: AtomicU64,
    /// Commits rejected by validation.
    conflicts: AtomicU64,

    // WAL counters
    /// WAL entries appended.
    wal_entries: AtomicU64,
    /// WAL bytes appended.
    wal_bytes: AtomicU64,
    /// WAL entries replayed at open.
    wal_entries_replayed: AtomicU64,

    // Maintenance counters
    /// Checkpoints completed.
    checkpoints: AtomicU64,
    /// Compactions committed.
    compactions: AtomicU64,
    /// Segments reclaimed by garbage collection.
    segments_reclaimed: AtomicU64,
    /// Background tasks that failed.
    task_failures: AtomicU64,
}

impl StorageStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_txn_start(&self) {
        self.txns_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_txn_commit(&self) {
        self.txns_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_txn_rollback(&self) {
        self.txns_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one WAL append of `bytes`.
    pub(crate) fn record_wal_append(&self, bytes: u64) {
        self.wal_entries.fetch_add(1, Ordering::Relaxed);
        self.wal_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_replayed(&self, entries: u64) {
        self.wal_entries_replayed.fetch_add(entries, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reclaimed(&self, segments: u64) {
        self.segments_reclaimed.fetch_add(segments, Ordering::Relaxed);
    }

    pub(crate) fn record_task_failure(&self) {
        self.task_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of transactions started.
    pub fn txns_started(&self) -> u64 {
        self.txns_started.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    pub fn txns_committed(&self) -> u64 {
        self.txns_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back.
    pub fn txns_rolled_back(&self) -> u64 {
        self.txns_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of commits rejected by validation.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of WAL entries appended.
    pub fn wal_entries(&self) -> u64 {
        self.wal_entries.load(Ordering::Relaxed)
    }

    /// Returns the number of WAL bytes appended.
    pub fn wal_bytes(&self) -> u64 {
        self.wal_bytes.load(Ordering::Relaxed)
    }

    /// Returns the number of WAL entries replayed at open.
    pub fn wal_entries_replayed(&self) -> u64 {
        self.wal_entries_replayed.load(Ordering::Relaxed)
    }

    /// Returns the number of checkpoints.
    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    /// Returns the number of compactions.
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    /// Returns the number of segments reclaimed.
    pub fn segments_reclaimed(&self) -> u64 {
        self.segments_reclaimed.load(Ordering::Relaxed)
    }

    /// Returns the number of failed background tasks.
    pub fn task_failures(&self) -> u64 {
        self.task_failures.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            txns_started: self.txns_started(),
            txns_committed: self.txns_committed(),
            txns_rolled_back: self.txns_rolled_back(),
            conflicts: self.conflicts(),
            wal_entries: self.wal_entries(),
            wal_bytes: self.wal_bytes(),
            wal_entries_replayed: self.wal_entries_replayed(),
            checkpoints: self.checkpoints(),
            compactions: self.compactions(),
            segments_reclaimed: self.segments_reclaimed(),
            task_failures: self.task_failures(),
        }
    }
}

/// A point-in-time copy of [`StorageStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct StatsSnapshot {
    /// Transactions started.
    pub txns_started: u64,
    /// Transactions committed.
    pub txns_committed: u64,
    /// Transactions rolled back.
    pub txns_rolled_back: u64,
    /// Commits rejected by validation.
    pub conflicts: u64,
    /// WAL entries appended.
    pub wal_entries: u64,
    /// WAL bytes appended.
    pub wal_bytes: u64,
    /// WAL entries replayed at open.
    pub wal_entries_replayed: u64,
    /// Checkpoints completed.
    pub checkpoints: u64,
    /// Compactions committed.
    pub compactions: u64,
    /// Segments reclaimed by garbage collection.
    pub segments_reclaimed: u64,
    /// Background tasks that failed.
    pub task_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = StorageStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_transactions() {
        let stats = StorageStats::new();

        stats.record_txn_start();
        stats.record_txn_start();
        stats.record_txn_commit();
        stats.record_conflict();
        stats.record_txn_rollback();

        assert_eq!(stats.txns_started(), 2);
        assert_eq!(stats.txns_committed(), 1);
        assert_eq!(stats.txns_rolled_back(), 1);
        assert_eq!(stats.conflicts(), 1);
    }

    #[test]
    fn snapshot() {
        let stats = StorageStats::new();
        stats.record_wal_append(120);
        stats.record_wal_append(30);
        stats.record_checkpoint();
        stats.record_reclaimed(3);

        let snap = stats.snapshot();
        assert_eq!(snap.wal_entries, 2);
        assert_eq!(snap.wal_bytes, 150);
        assert_eq!(snap.checkpoints, 1);
        assert_eq!(snap.segments_reclaimed, 3);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(StorageStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_txn_start();
                    s.record_wal_append(1);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.txns_started(), 1000);
        assert_eq!(stats.wal_bytes(), 1000);
    }
}
