//! Transaction manager.

use super::conflict::{CommitHistory, ConflictKey};
use super::state::TxnState;
use super::transaction::Txn;
use crate::buffer::BufferManager;
use crate::catalog::{BlockLayout, Catalog};
use crate::error::{CoreError, CoreResult};
use crate::stats::StorageStats;
use crate::types::{Timestamp, TxnId};
use crate::wal::{WalEntry, WalManager, WalRecord};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Commit timestamps handed out but not yet published, each with the
/// tables and indexes its commit writes.
///
/// A transaction may only fix its snapshot at `begin_ts` once every commit
/// below `begin_ts` is visible in the catalog. Commits writing a common table
/// or index apply in timestamp order, as replay does; the rest apply side by
/// side.
#[derive(Debug, Default)]
pub(crate) struct CommitGate {
    in_flight: Mutex<BTreeMap<Timestamp, Vec<ConflictKey>>>,
    published: Condvar,
}

impl CommitGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Draws a commit timestamp from `oracle` and marks it in flight.
    fn enter(&self, oracle: &AtomicU64, objects: Vec<ConflictKey>) -> Timestamp {
        let mut in_flight = self.in_flight.lock();
        let ts = Timestamp(oracle.fetch_add(1, Ordering::SeqCst));
        in_flight.insert(ts, objects);
        ts
    }

    fn leave(&self, ts: Timestamp) {
        self.in_flight.lock().remove(&ts);
        self.published.notify_all();
    }

    /// Blocks until no earlier in-flight commit writes an object the commit
    /// at `ts` writes.
    fn wait_turn(&self, ts: Timestamp) {
        let mut in_flight = self.in_flight.lock();
        loop {
            let blocked = in_flight.get(&ts).is_some_and(|mine| {
                in_flight
                    .range(..ts)
                    .any(|(_, theirs)| theirs.iter().any(|key| mine.contains(key)))
            });
            if !blocked {
                return;
            }
            self.published.wait(&mut in_flight);
        }
    }

    /// Blocks until no commit below `ts` is in flight.
    pub(crate) fn wait_published_before(&self, ts: Timestamp) {
        let mut in_flight = self.in_flight.lock();
        while in_flight
            .first_key_value()
            .is_some_and(|(first, _)| *first < ts)
        {
            self.published.wait(&mut in_flight);
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Hands out timestamps and runs the commit pipeline.
///
/// Begin and commit timestamps come from one counter. Validation, timestamp
/// assignment and logging happen under one lock, so the WAL is in timestamp
/// order. Applying to the catalog happens outside it: commits on different
/// tables apply concurrently and are published to transactions beginning
/// afterwards through the [`CommitGate`].
pub struct TxnManager {
    catalog: Arc<Catalog>,
    buffer: Arc<BufferManager>,
    wal: Arc<WalManager>,
    stats: Arc<StorageStats>,
    layout: BlockLayout,
    /// Next timestamp to hand out.
    oracle: AtomicU64,
    gate: Arc<CommitGate>,
    active: Mutex<BTreeMap<TxnId, Arc<Txn>>>,
    history: Mutex<CommitHistory>,
    /// Set once a logged commit failed to apply.
    poisoned: AtomicBool,
}

impl TxnManager {
    /// Creates a manager whose first timestamp is `next_ts`.
    pub fn new(
        catalog: Arc<Catalog>,
        buffer: Arc<BufferManager>,
        wal: Arc<WalManager>,
        stats: Arc<StorageStats>,
        layout: BlockLayout,
        next_ts: Timestamp,
    ) -> Self {
        Self {
            catalog,
            buffer,
            wal,
            stats,
            layout,
            oracle: AtomicU64::new(next_ts.as_u64().max(1)),
            gate: Arc::new(CommitGate::new()),
            active: Mutex::new(BTreeMap::new()),
            history: Mutex::new(CommitHistory::new()),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Registers a new transaction. Call [`Txn::begin`] before using it.
    pub fn create_txn(&self) -> Arc<Txn> {
        let begin_ts = Timestamp(self.oracle.fetch_add(1, Ordering::SeqCst));
        let txn = Arc::new(Txn::new(
            begin_ts,
            Arc::clone(&self.catalog),
            Arc::clone(&self.buffer),
            Arc::clone(&self.gate),
            self.layout,
        ));
        self.active.lock().insert(txn.txn_id(), Arc::clone(&txn));
        self.stats.record_txn_start();
        debug!(txn_id = %txn.txn_id(), %begin_ts, "created transaction");
        txn
    }

    /// Creates and begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot begin.
    pub fn begin_txn(&self) -> CoreResult<Arc<Txn>> {
        let txn = self.create_txn();
        if let Err(e) = txn.begin() {
            self.deregister(&txn);
            return Err(e);
        }
        Ok(txn)
    }

    /// Commits `txn` and returns its commit timestamp.
    ///
    /// Read-only transactions commit without logging.
    ///
    /// # Errors
    ///
    /// - `TxnConflict` if a commit newer than the snapshot wrote a
    ///   conflicting object; the transaction is rolled back.
    /// - The WAL error if logging fails; the transaction is rolled back and
    ///   the log is left as it was.
    /// - `Unrecoverable` if a logged command fails to apply. The manager
    ///   refuses every later write commit.
    pub fn commit_txn(&self, txn: &Txn) -> CoreResult<Timestamp> {
        if let Err(e) = txn.transition(TxnState::Committing) {
            // Never begun: retire it so it stops holding back the oldest snapshot.
            if txn.state() == TxnState::Created {
                self.abort(txn);
            }
            return Err(e);
        }
        let store = txn.take_store();

        if store.is_read_only() {
            let commit_ts = Timestamp(self.oracle.fetch_add(1, Ordering::SeqCst));
            self.finish(txn, commit_ts);
            return Ok(commit_ts);
        }

        if self.poisoned.load(Ordering::Acquire) {
            self.abort(txn);
            return Err(CoreError::unrecoverable(
                "an earlier commit failed to apply; reopen the storage",
            ));
        }

        // In-flight commits can only hold a database key in shared mode
        // together; their table keys decide the apply order.
        let objects: Vec<ConflictKey> = store
            .write_set()
            .keys()
            .filter(|key| !matches!(key, ConflictKey::Database(_)))
            .cloned()
            .collect();

        let commit_ts = {
            let mut history = self.history.lock();
            if let Some((winner, key)) = history.find_conflict(txn.begin_ts(), store.write_set()) {
                drop(history);
                self.stats.record_conflict();
                self.abort(txn);
                warn!(txn_id = %txn.txn_id(), %winner, %key, "commit conflict");
                return Err(CoreError::txn_conflict(
                    txn.txn_id().as_u64(),
                    format!("{key} was written by {winner}"),
                ));
            }

            let commit_ts = self.gate.enter(&self.oracle, objects);
            let entry = WalRecord::Entry(WalEntry {
                txn_id: txn.txn_id(),
                commit_ts,
                cmds: store.cmds().to_vec(),
            });
            match self.wal.append(&entry) {
                Ok(bytes) => self.stats.record_wal_append(bytes),
                Err(e) => {
                    self.gate.leave(commit_ts);
                    drop(history);
                    self.abort(txn);
                    return Err(e);
                }
            }
            history.record(commit_ts, txn.txn_id(), store.write_set().clone());
            commit_ts
        };

        self.gate.wait_turn(commit_ts);
        for (i, cmd) in store.cmds().iter().enumerate() {
            if let Err(e) = self
                .catalog
                .apply_cmd(cmd, commit_ts, &self.buffer, store.merged(i))
            {
                self.poisoned.store(true, Ordering::Release);
                self.gate.leave(commit_ts);
                self.abort(txn);
                error!(
                    txn_id = %txn.txn_id(),
                    %commit_ts,
                    error = %e,
                    "logged command failed to apply"
                );
                return Err(CoreError::unrecoverable(format!(
                    "{} logged at {commit_ts} failed to apply: {e}",
                    cmd.name()
                )));
            }
        }

        self.finish(txn, commit_ts);
        self.gate.leave(commit_ts);
        self.history.lock().prune(self.oldest_active_ts());
        debug!(
            txn_id = %txn.txn_id(),
            %commit_ts,
            cmds = store.cmds().len(),
            "committed"
        );
        Ok(commit_ts)
    }

    /// Discards everything `txn` staged.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the transaction already finished.
    pub fn rollback_txn(&self, txn: &Txn) -> CoreResult<()> {
        txn.transition(TxnState::RolledBack)?;
        drop(txn.take_store());
        self.deregister(txn);
        self.stats.record_txn_rollback();
        debug!(txn_id = %txn.txn_id(), "rolled back");
        Ok(())
    }

    fn finish(&self, txn: &Txn, commit_ts: Timestamp) {
        txn.set_commit_ts(commit_ts);
        // Committing -> Committed is always legal here.
        let _ = txn.transition(TxnState::Committed);
        self.deregister(txn);
        self.stats.record_txn_commit();
    }

    fn abort(&self, txn: &Txn) {
        let _ = txn.transition(TxnState::RolledBack);
        self.deregister(txn);
        self.stats.record_txn_rollback();
    }

    fn deregister(&self, txn: &Txn) {
        self.active.lock().remove(&txn.txn_id());
    }

    /// Smallest begin timestamp among unfinished transactions, or the next
    /// timestamp if there are none.
    ///
    /// No current or future snapshot is older.
    #[must_use]
    pub fn oldest_active_ts(&self) -> Timestamp {
        let active = self.active.lock();
        match active.keys().next() {
            Some(oldest) => Timestamp(oldest.as_u64()),
            None => Timestamp(self.oracle.load(Ordering::SeqCst)),
        }
    }

    /// Number of unfinished transactions.
    #[must_use]
    pub fn active_txn_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Next timestamp the oracle hands out.
    #[must_use]
    pub fn next_ts(&self) -> Timestamp {
        Timestamp(self.oracle.load(Ordering::SeqCst))
    }

    /// Whether a logged commit failed to apply.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for TxnManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnManager")
            .field("next_ts", &self.next_ts())
            .field("active", &self.active_txn_count())
            .field("in_flight", &self.gate.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, TableDef};
    use crate::data::DataBlock;
    use crate::types::ConflictType;
    use crossbeam_channel::{bounded, Receiver, Sender};
    use std::thread;
    use std::time::Duration;
    use strata_codec::{LogicalType, Value};
    use strata_storage::{BackendProvider, MemoryProvider, StorageBackend, StorageResult};

    /// Memory provider whose first column write after `armed` is set blocks
    /// until `release` receives.
    #[derive(Debug)]
    struct Stalling {
        inner: MemoryProvider,
        armed: Arc<AtomicBool>,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    struct StallingBackend {
        inner: Box<dyn StorageBackend>,
        stall: Option<(Arc<AtomicBool>, Sender<()>, Receiver<()>)>,
    }

    impl StorageBackend for StallingBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            if let Some((armed, entered, release)) = &self.stall {
                if armed.swap(false, Ordering::SeqCst) {
                    entered.send(()).unwrap();
                    release.recv().unwrap();
                }
            }
            self.inner.append(data)
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }

        fn sync(&mut self) -> StorageResult<()> {
            self.inner.sync()
        }

        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            self.inner.truncate(new_size)
        }
    }

    impl BackendProvider for Stalling {
        fn open(&self, key: &str) -> StorageResult<Box<dyn StorageBackend>> {
            let stall = key.starts_with("data/").then(|| {
                (
                    Arc::clone(&self.armed),
                    self.entered.clone(),
                    self.release.clone(),
                )
            });
            Ok(Box::new(StallingBackend {
                inner: self.inner.open(key)?,
                stall,
            }))
        }

        fn exists(&self, key: &str) -> bool {
            self.inner.exists(key)
        }

        fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
            self.inner.read(key)
        }

        fn write_atomic(&self, key: &str, data: &[u8]) -> StorageResult<()> {
            self.inner.write_atomic(key, data)
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            self.inner.remove(key)
        }

        fn remove_prefix(&self, prefix: &str) -> StorageResult<()> {
            self.inner.remove_prefix(prefix)
        }

        fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
            self.inner.list(prefix)
        }
    }

    struct Fixture {
        catalog: Arc<Catalog>,
        wal: Arc<WalManager>,
        stats: Arc<StorageStats>,
        manager: TxnManager,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryProvider::new()))
    }

    fn fixture_with(provider: Arc<dyn BackendProvider>) -> Fixture {
        let catalog = Arc::new(Catalog::new());
        let buffer = Arc::new(BufferManager::new(Arc::clone(&provider)));
        let wal = Arc::new(WalManager::open(Arc::clone(&provider), 1 << 20, false).unwrap());
        let stats = Arc::new(StorageStats::new());
        let manager = TxnManager::new(
            Arc::clone(&catalog),
            buffer,
            Arc::clone(&wal),
            Arc::clone(&stats),
            BlockLayout {
                block_capacity: 4,
                segment_capacity: 2,
            },
            Timestamp(1),
        );
        Fixture {
            catalog,
            wal,
            stats,
            manager,
        }
    }

    fn rows(values: &[i64]) -> DataBlock {
        let mut block = DataBlock::new(&[LogicalType::BigInt]);
        for v in values {
            block.append_row(vec![Value::BigInt(*v)]).unwrap();
        }
        block
    }

    fn with_table(f: &Fixture) {
        let txn = f.manager.begin_txn().unwrap();
        txn.create_database("db1", ConflictType::Error).unwrap();
        txn.create_table(
            "db1",
            TableDef::new("t1", vec![ColumnDef::new(0, "v", LogicalType::BigInt)]),
            ConflictType::Error,
        )
        .unwrap();
        f.manager.commit_txn(&txn).unwrap();
    }

    #[test]
    fn commit_is_visible_to_later_snapshots_only() {
        let f = fixture();
        let before = f.manager.begin_txn().unwrap();

        let writer = f.manager.begin_txn().unwrap();
        writer.create_database("db1", ConflictType::Error).unwrap();
        let commit_ts = f.manager.commit_txn(&writer).unwrap();
        assert_eq!(writer.state(), TxnState::Committed);
        assert_eq!(writer.commit_ts(), Some(commit_ts));
        assert!(commit_ts > writer.begin_ts());

        assert!(before.list_databases().is_empty());
        let after = f.manager.begin_txn().unwrap();
        assert_eq!(after.list_databases(), vec!["db1"]);
        assert!(f.catalog.get_database("db1", commit_ts).is_ok());
    }

    #[test]
    fn read_only_commit_writes_no_wal() {
        let f = fixture();
        let txn = f.manager.begin_txn().unwrap();
        f.manager.commit_txn(&txn).unwrap();
        assert!(f.wal.read_all().unwrap().is_empty());
        assert_eq!(f.stats.txns_committed(), 1);
        assert_eq!(f.manager.active_txn_count(), 0);
    }

    #[test]
    fn conflicting_ddl_aborts_the_later_commit() {
        let f = fixture();
        let a = f.manager.begin_txn().unwrap();
        let b = f.manager.begin_txn().unwrap();
        a.create_database("db1", ConflictType::Error).unwrap();
        b.create_database("db1", ConflictType::Error).unwrap();

        f.manager.commit_txn(&a).unwrap();
        let err = f.manager.commit_txn(&b).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(b.state(), TxnState::RolledBack);
        assert_eq!(f.stats.conflicts(), 1);
        assert_eq!(f.wal.read_all().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_appends_both_commit() {
        let f = fixture();
        with_table(&f);
        let a = f.manager.begin_txn().unwrap();
        let b = f.manager.begin_txn().unwrap();
        a.append("db1", "t1", rows(&[1, 2])).unwrap();
        b.append("db1", "t1", rows(&[3])).unwrap();
        f.manager.commit_txn(&a).unwrap();
        f.manager.commit_txn(&b).unwrap();

        let reader = f.manager.begin_txn().unwrap();
        let table = reader.get_table_entry("db1", "t1").unwrap();
        assert_eq!(table.row_count(reader.begin_ts()), 3);
    }

    #[test]
    fn drop_table_conflicts_with_append() {
        let f = fixture();
        with_table(&f);
        let append = f.manager.begin_txn().unwrap();
        let dropper = f.manager.begin_txn().unwrap();
        append.append("db1", "t1", rows(&[1])).unwrap();
        dropper.drop_table_by_name("db1", "t1", ConflictType::Error).unwrap();

        f.manager.commit_txn(&dropper).unwrap();
        assert!(matches!(
            f.manager.commit_txn(&append),
            Err(CoreError::TxnConflict { .. })
        ));
    }

    #[test]
    fn rollback_discards_staged_work() {
        let f = fixture();
        let txn = f.manager.begin_txn().unwrap();
        txn.create_database("db1", ConflictType::Error).unwrap();
        f.manager.rollback_txn(&txn).unwrap();

        assert!(f.manager.rollback_txn(&txn).is_err());
        assert!(f.manager.commit_txn(&txn).is_err());
        assert!(f.wal.read_all().unwrap().is_empty());
        assert!(f.manager.begin_txn().unwrap().list_databases().is_empty());
    }

    #[test]
    fn oldest_active_tracks_unfinished_transactions() {
        let f = fixture();
        let first = f.manager.begin_txn().unwrap();
        let second = f.manager.begin_txn().unwrap();
        assert_eq!(f.manager.oldest_active_ts(), first.begin_ts());

        f.manager.commit_txn(&first).unwrap();
        assert_eq!(f.manager.oldest_active_ts(), second.begin_ts());

        f.manager.rollback_txn(&second).unwrap();
        assert_eq!(f.manager.oldest_active_ts(), f.manager.next_ts());
    }

    #[test]
    fn begin_waits_for_in_flight_commits() {
        let gate = Arc::new(CommitGate::new());
        let oracle = AtomicU64::new(5);
        let commit_ts = gate.enter(&oracle, Vec::new());
        assert_eq!(commit_ts, Timestamp(5));

        let waiter = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || gate.wait_published_before(Timestamp(6)))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        gate.leave(commit_ts);
        waiter.join().unwrap();
        gate.wait_published_before(Timestamp(100));
    }

    #[test]
    fn commits_from_many_threads_get_distinct_timestamps() {
        let f = Arc::new(fixture());
        with_table(&f);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || {
                    let txn = f.manager.begin_txn().unwrap();
                    txn.append("db1", "t1", rows(&[i])).unwrap();
                    f.manager.commit_txn(&txn).unwrap()
                })
            })
            .collect();
        let mut stamps: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        stamps.sort();
        stamps.dedup();
        assert_eq!(stamps.len(), 8);

        let reader = f.manager.begin_txn().unwrap();
        let table = reader.get_table_entry("db1", "t1").unwrap();
        assert_eq!(table.row_count(reader.begin_ts()), 8);
    }

    #[test]
    fn commit_on_another_table_passes_a_stalled_apply() {
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let armed = Arc::new(AtomicBool::new(false));
        let f = fixture_with(Arc::new(Stalling {
            inner: MemoryProvider::new(),
            armed: Arc::clone(&armed),
            entered: entered_tx,
            release: release_rx,
        }));
        with_table(&f);
        let setup = f.manager.begin_txn().unwrap();
        setup
            .create_table(
                "db1",
                TableDef::new("t2", vec![ColumnDef::new(0, "v", LogicalType::BigInt)]),
                ConflictType::Error,
            )
            .unwrap();
        f.manager.commit_txn(&setup).unwrap();

        let slow = f.manager.begin_txn().unwrap();
        let fast = f.manager.begin_txn().unwrap();
        slow.append("db1", "t1", rows(&[1, 2])).unwrap();
        fast.append("db1", "t2", rows(&[3])).unwrap();

        thread::scope(|s| {
            armed.store(true, Ordering::SeqCst);
            let stalled = s.spawn(|| f.manager.commit_txn(&slow));
            entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

            let fast_ts = f.manager.commit_txn(&fast).unwrap();
            assert_eq!(fast.state(), TxnState::Committed);
            assert!(!stalled.is_finished());

            release_tx.send(()).unwrap();
            let slow_ts = stalled.join().unwrap().unwrap();
            assert!(slow_ts < fast_ts);
        });

        let reader = f.manager.begin_txn().unwrap();
        let ts = reader.begin_ts();
        assert_eq!(reader.get_table_entry("db1", "t1").unwrap().row_count(ts), 2);
        assert_eq!(reader.get_table_entry("db1", "t2").unwrap().row_count(ts), 1);
    }

    #[test]
    fn apply_waits_only_for_earlier_commits_on_the_same_table() {
        let gate = Arc::new(CommitGate::new());
        let oracle = AtomicU64::new(5);
        let t1 = || vec![ConflictKey::Table("db1".into(), "t1".into())];
        let t2 = vec![ConflictKey::Table("db1".into(), "t2".into())];

        let first = gate.enter(&oracle, t1());
        let other = gate.enter(&oracle, t2);
        let second = gate.enter(&oracle, t1());
        gate.wait_turn(first);
        gate.wait_turn(other);

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_turn(second))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        gate.leave(other);
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        gate.leave(first);
        waiter.join().unwrap();
    }

    #[test]
    fn commit_of_unbegun_transaction_retires_it() {
        let f = fixture();
        let txn = f.manager.create_txn();
        assert_eq!(f.manager.oldest_active_ts(), txn.begin_ts());

        assert!(f.manager.commit_txn(&txn).is_err());
        assert_eq!(txn.state(), TxnState::RolledBack);
        assert_eq!(f.manager.active_txn_count(), 0);
        assert!(f.manager.oldest_active_ts() > txn.begin_ts());
    }
}
