//! Crash simulation for Strata.
//!
//! A crash can leave the last WAL record half written, or a disk can flip a
//! bit in one already written. These helpers reproduce both on a closed
//! storage directory so tests can check what recovery does with them.
//! [`SyncFailingProvider`] makes `fsync` fail on a live storage.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut storage = TestStorage::new();
//! // ... commit work
//! storage.close();
//! truncate_wal_tail(storage.path(), 3);
//! storage.open();
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_storage::{
    BackendProvider, MemoryProvider, StorageBackend, StorageError, StorageResult,
};

/// WAL files of a storage directory, oldest first.
pub fn wal_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(root.join("wal"))
        .expect("Failed to list WAL directory")
        .map(|entry| entry.expect("Failed to read WAL entry").path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
        .collect();
    files.sort();
    files
}

/// The WAL file commits are appended to.
pub fn active_wal_file(root: &Path) -> PathBuf {
    wal_files(root)
        .pop()
        .expect("storage has no WAL file")
}

/// Size of the active WAL file.
pub fn wal_size(root: &Path) -> u64 {
    fs::metadata(active_wal_file(root))
        .expect("Failed to stat WAL file")
        .len()
}

/// Cuts `bytes` off the end of the active WAL file, as a crash mid-write
/// would.
pub fn truncate_wal_tail(root: &Path, bytes: u64) {
    let path = active_wal_file(root);
    let file = OpenOptions::new()
        .write(true)
        .open(&path)
        .expect("Failed to open WAL file");
    let len = file.metadata().expect("Failed to stat WAL file").len();
    file.set_len(len.saturating_sub(bytes))
        .expect("Failed to truncate WAL file");
}

/// Inverts one byte of the active WAL file.
pub fn flip_wal_byte(root: &Path, offset: u64) {
    let path = active_wal_file(root);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .expect("Failed to open WAL file");
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.read_exact(&mut byte).expect("offset past end of WAL");
    byte[0] = !byte[0];
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.write_all(&byte).expect("Failed to write WAL byte");
    file.sync_all().expect("Failed to sync WAL file");
}

/// Appends bytes that look like the start of a record that never finished.
pub fn append_partial_record(root: &Path, bytes: &[u8]) {
    let path = active_wal_file(root);
    let mut file = OpenOptions::new()
        .append(true)
        .open(&path)
        .expect("Failed to open WAL file");
    file.write_all(bytes).expect("Failed to append to WAL file");
    file.sync_all().expect("Failed to sync WAL file");
}

/// In-memory provider whose `sync` calls fail while switched on.
///
/// Clones share the objects and the switch, so a storage reopened on a clone
/// sees exactly what the failing one left behind.
#[derive(Debug, Default, Clone)]
pub struct SyncFailingProvider {
    inner: MemoryProvider,
    failing: Arc<AtomicBool>,
}

impl SyncFailingProvider {
    /// Creates an empty provider with syncs working.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `sync` fail (`true`) or succeed (`false`).
    pub fn fail_syncs(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// This provider as a shared trait object for `Storage::open_with_provider`.
    pub fn shared(&self) -> Arc<dyn BackendProvider> {
        Arc::new(self.clone())
    }
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
            return Err(StorageError::Io(io::Error::other("fsync failed")));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

impl BackendProvider for SyncFailingProvider {
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
