//! WAL writer and reader over numbered files.

use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use crate::wal::iterator::WalRecordIterator;
use crate::wal::record::{WalEntry, WalRecord};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use strata_storage::{BackendProvider, StorageBackend};
use tracing::{debug, error, info, warn};

/// Directory of the WAL files.
pub const WAL_DIR: &str = "wal";

/// Key of WAL file `seq`.
#[must_use]
pub fn wal_file_key(seq: u64) -> String {
    format!("{WAL_DIR}/wal-{seq:08}.log")
}

fn parse_seq(key: &str) -> Option<u64> {
    key.strip_prefix(WAL_DIR)?
        .strip_prefix("/wal-")?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

struct ActiveFile {
    seq: u64,
    backend: Box<dyn StorageBackend>,
    size: u64,
    /// Set when a failed append could not be rolled back durably.
    broken: bool,
}

/// Append-only log of committed transactions.
///
/// Records go to the active file `wal/wal-<seq>.log`; once it reaches the
/// size limit the next record opens `seq + 1`. Older files are deleted by
/// [`WalManager::truncate_before`] after a checkpoint covers them.
pub struct WalManager {
    provider: Arc<dyn BackendProvider>,
    active: Mutex<ActiveFile>,
    max_file_size: u64,
    sync_on_write: bool,
}

impl WalManager {
    /// Opens the WAL, continuing the newest file.
    ///
    /// An incomplete record at the end of the newest file is cut off so new
    /// records follow the last complete one.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be listed or opened, or the
    /// newest file is corrupt.
    pub fn open(
        provider: Arc<dyn BackendProvider>,
        max_file_size: u64,
        sync_on_write: bool,
    ) -> CoreResult<Self> {
        let seq = Self::list_seqs(provider.as_ref())?.last().copied().unwrap_or(1);
        let mut backend = provider.open(&wal_file_key(seq))?;

        let (valid_end, truncated) = {
            let mut iter = WalRecordIterator::new(backend.as_ref(), 0)?;
            for record in iter.by_ref() {
                record?;
            }
            (iter.valid_end(), iter.truncated())
        };
        if truncated {
            warn!(
                file = %wal_file_key(seq),
                valid_end,
                "discarding incomplete record at end of WAL"
            );
            backend.truncate(valid_end)?;
            backend.sync()?;
        }
        debug!(seq, size = valid_end, "opened WAL");

        Ok(Self {
            provider,
            active: Mutex::new(ActiveFile {
                seq,
                backend,
                size: valid_end,
                broken: false,
            }),
            max_file_size,
            sync_on_write,
        })
    }

    fn list_seqs(provider: &dyn BackendProvider) -> CoreResult<Vec<u64>> {
        let mut seqs: Vec<u64> = provider
            .list(WAL_DIR)?
            .iter()
            .filter_map(|key| parse_seq(key))
            .collect();
        seqs.sort_unstable();
        Ok(seqs)
    }

    fn rotate_locked(&self, active: &mut ActiveFile) -> CoreResult<()> {
        active.backend.sync()?;
        let seq = active.seq + 1;
        active.backend = self.provider.open(&wal_file_key(seq))?;
        active.seq = seq;
        active.size = 0;
        debug!(seq, "rotated WAL");
        Ok(())
    }

    /// Appends a record and makes it durable.
    ///
    /// Returns the number of bytes written. A failed append leaves no trace:
    /// the active file is cut back to its size before the write. If that cut
    /// cannot be made durable either, every later append is refused until
    /// the WAL is reopened.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails, or `Unrecoverable`
    /// once the WAL is broken.
    pub fn append(&self, record: &WalRecord) -> CoreResult<u64> {
        let data = record.encode()?;
        let len = data.len() as u64;

        let mut active = self.active.lock();
        if active.broken {
            return Err(CoreError::unrecoverable(
                "an earlier WAL append could not be rolled back; reopen the storage",
            ));
        }
        if active.size > 0 && active.size + len > self.max_file_size {
            self.rotate_locked(&mut active)?;
        }
        let start = active.size;
        if let Err(e) = self.write_locked(&mut active, &data) {
            self.roll_back_locked(&mut active, start);
            return Err(e);
        }
        active.size += len;
        Ok(len)
    }

    fn write_locked(&self, active: &mut ActiveFile, data: &[u8]) -> CoreResult<()> {
        active.backend.append(data)?;
        if self.sync_on_write {
            active.backend.sync()?;
        } else {
            active.backend.flush()?;
        }
        Ok(())
    }

    fn roll_back_locked(&self, active: &mut ActiveFile, size: u64) {
        let result = active
            .backend
            .truncate(size)
            .and_then(|()| active.backend.sync());
        match result {
            Ok(()) => warn!(seq = active.seq, size, "rolled back failed WAL append"),
            Err(e) => {
                active.broken = true;
                error!(
                    seq = active.seq,
                    size,
                    error = %e,
                    "could not roll back failed WAL append; refusing further appends"
                );
            }
        }
    }

    /// Whether a failed append left the WAL refusing writes.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.active.lock().broken
    }

    /// Forces everything written so far to stable storage.
    pub fn flush(&self) -> CoreResult<()> {
        self.active.lock().backend.sync()?;
        Ok(())
    }

    /// Starts a new file and returns its sequence number.
    pub fn rotate(&self) -> CoreResult<u64> {
        let mut active = self.active.lock();
        self.rotate_locked(&mut active)?;
        Ok(active.seq)
    }

    /// Sequence number of the active file.
    #[must_use]
    pub fn current_seq(&self) -> u64 {
        self.active.lock().seq
    }

    /// Size of the active file.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.active.lock().size
    }

    /// Keys of every WAL file, oldest first.
    pub fn files(&self) -> CoreResult<Vec<String>> {
        Ok(Self::list_seqs(self.provider.as_ref())?
            .into_iter()
            .map(wal_file_key)
            .collect())
    }

    /// Deletes closed files whose records all have timestamps at or below
    /// `ts`. Returns the number of files deleted.
    ///
    /// Stops at the first file that still holds a newer record, so the log
    /// stays contiguous.
    pub fn truncate_before(&self, ts: Timestamp) -> CoreResult<usize> {
        let current = self.current_seq();
        let mut removed = 0;
        for seq in Self::list_seqs(self.provider.as_ref())? {
            if seq >= current {
                break;
            }
            let key = wal_file_key(seq);
            let mut newest = Timestamp::ZERO;
            self.for_each_in_file(&key, false, |_, record| {
                newest = newest.max(record.timestamp());
                Ok(true)
            })?;
            if newest > ts {
                break;
            }
            self.provider.remove(&key)?;
            removed += 1;
        }
        if removed > 0 {
            info!(files = removed, checkpoint_ts = %ts, "truncated WAL");
        }
        Ok(removed)
    }

    fn for_each_in_file<F>(&self, key: &str, last: bool, mut callback: F) -> CoreResult<bool>
    where
        F: FnMut(u64, WalRecord) -> CoreResult<bool>,
    {
        let backend = self.provider.open(key)?;
        let mut iter = WalRecordIterator::new(backend.as_ref(), 0)?;
        for result in iter.by_ref() {
            let (offset, record) = result?;
            if !callback(offset, record)? {
                return Ok(false);
            }
        }
        if iter.truncated() {
            if !last {
                return Err(CoreError::wal_corruption(format!(
                    "incomplete record at offset {} of {key}",
                    iter.valid_end()
                )));
            }
            warn!(file = key, valid_end = iter.valid_end(), "WAL ends with an incomplete record");
        }
        Ok(true)
    }

    /// Streams every record across all files in order.
    ///
    /// The callback receives the file key, offset and record, and returns
    /// `Ok(false)` to stop early.
    pub fn for_each_record<F>(&self, mut callback: F) -> CoreResult<()>
    where
        F: FnMut(&str, u64, WalRecord) -> CoreResult<bool>,
    {
        let files = self.files()?;
        for (i, key) in files.iter().enumerate() {
            let last = i + 1 == files.len();
            if !self.for_each_in_file(key, last, |offset, record| callback(key, offset, record))? {
                break;
            }
        }
        Ok(())
    }

    /// Streams the committed entries with `commit_ts > after`, in log order.
    pub fn replay_entries<F>(&self, after: Timestamp, mut callback: F) -> CoreResult<()>
    where
        F: FnMut(WalEntry) -> CoreResult<()>,
    {
        self.for_each_record(|_, _, record| {
            if let WalRecord::Entry(entry) = record {
                if entry.commit_ts > after {
                    callback(entry)?;
                }
            }
            Ok(true)
        })
    }

    /// Every committed entry across all files, checkpoint markers skipped.
    pub fn iter_entries(&self) -> CoreResult<impl Iterator<Item = WalEntry>> {
        Ok(self.read_all()?.into_iter().filter_map(|record| match record {
            WalRecord::Entry(entry) => Some(entry),
            WalRecord::Checkpoint(_) => None,
        }))
    }

    /// Reads every record. Prefer the streaming methods for large logs.
    pub fn read_all(&self) -> CoreResult<Vec<WalRecord>> {
        let mut records = Vec::new();
        self.for_each_record(|_, _, record| {
            records.push(record);
            Ok(true)
        })?;
        Ok(records)
    }
}

impl fmt::Debug for WalManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalManager")
            .field("max_file_size", &self.max_file_size)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxnId;
    use crate::wal::record::{CheckpointMarker, WalCmd};
    use std::sync::atomic::{AtomicBool, Ordering};
    use strata_storage::{MemoryProvider, StorageError, StorageResult};

    /// Memory provider whose backends fail `sync` while `failing` is set.
    #[derive(Debug, Default)]
    struct SyncFailing {
        inner: MemoryProvider,
        failing: Arc<AtomicBool>,
    }

    struct SyncFailingBackend {
        inner: Box<dyn StorageBackend>,
        failing: Arc<AtomicBool>,
    }

    impl StorageBackend for SyncFailingBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            self.inner.append(data)
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }

        fn sync(&mut self) -> StorageResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("fsync failed")));
            }
            self.inner.sync()
        }

        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            self.inner.truncate(new_size)
        }
    }

    impl BackendProvider for SyncFailing {
        fn open(&self, key: &str) -> StorageResult<Box<dyn StorageBackend>> {
            Ok(Box::new(SyncFailingBackend {
                inner: self.inner.open(key)?,
                failing: Arc::clone(&self.failing),
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

    fn entry(ts: u64) -> WalRecord {
        WalRecord::Entry(WalEntry {
            txn_id: TxnId(ts - 1),
            commit_ts: Timestamp(ts),
            cmds: vec![WalCmd::DropDatabase {
                db_name: format!("db{ts}"),
            }],
        })
    }

    fn open(provider: &Arc<MemoryProvider>, max: u64) -> WalManager {
        WalManager::open(Arc::clone(provider) as Arc<dyn BackendProvider>, max, false).unwrap()
    }

    #[test]
    fn append_and_read_back() {
        let provider = Arc::new(MemoryProvider::new());
        let wal = open(&provider, 1 << 20);
        assert!(wal.read_all().unwrap().is_empty());

        let written = wal.append(&entry(2)).unwrap();
        wal.append(&entry(3)).unwrap();
        assert_eq!(written, entry(2).encode().unwrap().len() as u64);
        assert_eq!(wal.read_all().unwrap(), vec![entry(2), entry(3)]);
        assert_eq!(wal.files().unwrap(), vec!["wal/wal-00000001.log".to_string()]);
    }

    #[test]
    fn rotates_at_size_limit() {
        let provider = Arc::new(MemoryProvider::new());
        let one = entry(2).encode().unwrap().len() as u64;
        let wal = open(&provider, one * 2);
        for ts in 2..7 {
            wal.append(&entry(ts)).unwrap();
        }
        assert_eq!(wal.files().unwrap().len(), 3);
        assert_eq!(wal.current_seq(), 3);
        let timestamps: Vec<u64> = wal.read_all().unwrap().iter().map(|r| r.timestamp().0).collect();
        assert_eq!(timestamps, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn truncate_before_keeps_uncovered_files() {
        let provider = Arc::new(MemoryProvider::new());
        let wal = open(&provider, 1 << 20);
        wal.append(&entry(2)).unwrap();
        wal.append(&entry(3)).unwrap();
        wal.rotate().unwrap();
        wal.append(&entry(5)).unwrap();
        wal.rotate().unwrap();
        wal.append(&WalRecord::Checkpoint(CheckpointMarker {
            checkpoint_ts: Timestamp(4),
            file_name: "ckp".into(),
        }))
        .unwrap();

        assert_eq!(wal.truncate_before(Timestamp(4)).unwrap(), 1);
        assert_eq!(wal.files().unwrap().len(), 2);

        let mut replayed = Vec::new();
        wal.replay_entries(Timestamp(4), |entry| {
            replayed.push(entry.commit_ts);
            Ok(())
        })
        .unwrap();
        assert_eq!(replayed, vec![Timestamp(5)]);

        let kept: Vec<_> = wal.iter_entries().unwrap().map(|e| e.commit_ts).collect();
        assert_eq!(kept, vec![Timestamp(5)]);
    }

    #[test]
    fn failed_sync_leaves_no_record_behind() {
        let provider = Arc::new(SyncFailing::default());
        let failing = Arc::clone(&provider.failing);
        let wal = WalManager::open(Arc::clone(&provider) as Arc<dyn BackendProvider>, 1 << 20, true)
            .unwrap();
        wal.append(&entry(2)).unwrap();
        let size = wal.current_size();

        failing.store(true, Ordering::SeqCst);
        assert!(wal.append(&entry(3)).is_err());
        assert_eq!(wal.current_size(), size);
        assert_eq!(provider.inner.read(&wal_file_key(1)).unwrap().len() as u64, size);

        // The rollback itself could not be synced, so the log stays shut.
        assert!(wal.is_broken());
        failing.store(false, Ordering::SeqCst);
        assert!(matches!(
            wal.append(&entry(4)),
            Err(CoreError::Unrecoverable { .. })
        ));
        drop(wal);

        let wal = WalManager::open(Arc::clone(&provider) as Arc<dyn BackendProvider>, 1 << 20, true)
            .unwrap();
        assert!(!wal.is_broken());
        assert_eq!(wal.read_all().unwrap(), vec![entry(2)]);
        wal.append(&entry(5)).unwrap();
        assert_eq!(wal.read_all().unwrap(), vec![entry(2), entry(5)]);
    }

    #[test]
    fn reopen_cuts_torn_tail() {
        let provider = Arc::new(MemoryProvider::new());
        {
            let wal = open(&provider, 1 << 20);
            wal.append(&entry(2)).unwrap();
            wal.append(&entry(3)).unwrap();
        }
        let key = wal_file_key(1);
        let mut bytes = provider.read(&key).unwrap();
        bytes.truncate(bytes.len() - 3);
        provider.write_atomic(&key, &bytes).unwrap();

        let wal = open(&provider, 1 << 20);
        assert_eq!(wal.read_all().unwrap(), vec![entry(2)]);
        wal.append(&entry(4)).unwrap();
        assert_eq!(wal.read_all().unwrap(), vec![entry(2), entry(4)]);
    }

    #[test]
    fn torn_record_in_closed_file_is_corruption() {
        let provider = Arc::new(MemoryProvider::new());
        let wal = open(&provider, 1 << 20);
        wal.append(&entry(2)).unwrap();
        wal.rotate().unwrap();
        wal.append(&entry(3)).unwrap();

        let key = wal_file_key(1);
        let bytes = provider.read(&key).unwrap();
        provider.write_atomic(&key, &bytes[..bytes.len() - 1]).unwrap();
        assert!(matches!(wal.read_all(), Err(CoreError::WalCorruption { .. })));
    }

    #[test]
    fn file_keys() {
        assert_eq!(parse_seq(&wal_file_key(42)), Some(42));
        assert_eq!(parse_seq("wal/other.log"), None);
        assert_eq!(parse_seq("data/wal-00000001.log"), None);
    }
}
