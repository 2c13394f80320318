//! Storage directory management.
//!
//! ```text
//! <root>/
//! ├─ MANIFEST                 # format version, storage id, last checkpoint
//! ├─ LOCK                     # advisory lock for single-process access
//! ├─ wal/wal-<seq>.log        # write-ahead log files
//! └─ data/
//!    ├─ checkpoint/ckp-<ts>.cbor
//!    └─ <db>/<table>/seg_<id>/blk_<id>/col_<id>.col
//! ```
//!
//! The LOCK file ensures only one process opens the storage at a time.

use crate::checkpoint::MANIFEST_KEY;
use crate::error::{CoreError, CoreResult};
use crate::wal::WAL_DIR;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use strata_storage::FileProvider;

const LOCK_FILE: &str = "LOCK";
const DATA_DIR: &str = "data";

/// An opened storage directory, locked for the lifetime of the value.
#[derive(Debug)]
pub struct StorageDir {
    path: PathBuf,
    _lock_file: File,
}

impl StorageDir {
    /// Opens `path`, creating it if allowed, and takes the lock.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the directory is missing and
    ///   `create_if_missing` is false, or the path is not a directory.
    /// - `DatabaseLocked` if another process holds the lock.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(CoreError::invalid_operation(format!(
                    "storage directory does not exist: {}",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root of the storage.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory holds no storage yet.
    #[must_use]
    pub fn is_new_storage(&self) -> bool {
        let wal_dir = self.path.join(WAL_DIR);
        let wal_empty = fs::read_dir(&wal_dir).map_or(true, |mut entries| entries.next().is_none());
        !self.path.join(MANIFEST_KEY).exists() && wal_empty
    }

    /// Creates the `data/` and `wal/` directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn create_layout(&self) -> CoreResult<()> {
        fs::create_dir_all(self.path.join(DATA_DIR))?;
        fs::create_dir_all(self.path.join(WAL_DIR))?;
        strata_storage::sync_directory(&self.path)?;
        Ok(())
    }

    /// A provider rooted at this directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be created.
    pub fn provider(&self) -> CoreResult<FileProvider> {
        Ok(FileProvider::new(self.path.clone())?)
    }
}
