//! Checkpoints: durable catalog baselines that let the WAL be truncated.
//!
//! A checkpoint at timestamp `C` proceeds in this order:
//!
//! 1. capture a [`CatalogSnapshot`] as a reader at `C` sees it
//! 2. sync every column file
//! 3. write `data/checkpoint/ckp-<C>.cbor` atomically
//! 4. point the MANIFEST at it
//! 5. append a checkpoint marker to the WAL and rotate
//! 6. delete WAL files and older checkpoint files it covers
//!
//! A crash before step 4 leaves the previous baseline in force; the WAL
//! still holds everything after it. `C` must be the begin timestamp of a
//! started transaction, so every commit below it is fully applied.

mod manifest;
mod snapshot;

pub use manifest::{Manifest, MANIFEST_KEY, MANIFEST_MAGIC, MANIFEST_VERSION};
pub use snapshot::{
    BlockSnapshot, CatalogSnapshot, DatabaseSnapshot, IndexSnapshot, SegmentSnapshot,
    TableSnapshot, CHECKPOINT_MAGIC, CHECKPOINT_VERSION,
};

use crate::buffer::BufferManager;
use crate::catalog::{Catalog, GcSummary};
use crate::error::{CoreError, CoreResult};
use crate::stats::StorageStats;
use crate::types::Timestamp;
use crate::wal::{CheckpointMarker, WalManager, WalRecord};
use parking_lot::Mutex;
use std::sync::Arc;
use strata_storage::BackendProvider;
use tracing::{debug, info};

/// Directory holding checkpoint files.
pub const CHECKPOINT_DIR: &str = "data/checkpoint";

/// Returns the key of the checkpoint taken at `ts`.
#[must_use]
pub fn checkpoint_file_key(ts: Timestamp) -> String {
    format!("{CHECKPOINT_DIR}/ckp-{}.cbor", ts.as_u64())
}

/// Outcome of one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Timestamp the catalog was captured at.
    pub checkpoint_ts: Timestamp,
    /// Checkpoint file, relative to the storage root.
    pub file_name: String,
    /// WAL files deleted.
    pub wal_files_removed: usize,
    /// What garbage collection reclaimed, for full checkpoints.
    pub gc: Option<GcSummary>,
}

/// Takes checkpoints and loads the latest one.
pub struct CheckpointManager {
    provider: Arc<dyn BackendProvider>,
    catalog: Arc<Catalog>,
    buffer: Arc<BufferManager>,
    wal: Arc<WalManager>,
    manifest: Mutex<Manifest>,
    stats: Arc<StorageStats>,
}

impl CheckpointManager {
    /// Creates a checkpoint manager over an opened storage.
    pub fn new(
        provider: Arc<dyn BackendProvider>,
        catalog: Arc<Catalog>,
        buffer: Arc<BufferManager>,
        wal: Arc<WalManager>,
        manifest: Manifest,
        stats: Arc<StorageStats>,
    ) -> Self {
        Self {
            provider,
            catalog,
            buffer,
            wal,
            manifest: Mutex::new(manifest),
            stats,
        }
    }

    /// Loads the MANIFEST and the checkpoint it points at.
    ///
    /// Returns `None` for the manifest of a new storage.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointCorruption` if the checkpoint is missing, damaged
    /// or taken at another timestamp than the MANIFEST records.
    pub fn load(
        provider: &dyn BackendProvider,
    ) -> CoreResult<Option<(Manifest, Option<CatalogSnapshot>)>> {
        let Some(manifest) = Manifest::load(provider)? else {
            return Ok(None);
        };
        let snapshot = match (&manifest.checkpoint_file, manifest.last_checkpoint_ts) {
            (Some(file), Some(ts)) => {
                if !provider.exists(file) {
                    return Err(CoreError::checkpoint_corruption(format!(
                        "checkpoint {file} named by MANIFEST is missing"
                    )));
                }
                let snapshot = CatalogSnapshot::decode(&provider.read(file)?)?;
                if snapshot.checkpoint_ts != ts {
                    return Err(CoreError::checkpoint_corruption(format!(
                        "checkpoint {file} holds {}, MANIFEST expects {ts}",
                        snapshot.checkpoint_ts
                    )));
                }
                Some(snapshot)
            }
            _ => None,
        };
        Ok(Some((manifest, snapshot)))
    }

    /// Timestamp of the last checkpoint.
    #[must_use]
    pub fn last_checkpoint_ts(&self) -> Option<Timestamp> {
        self.manifest.lock().last_checkpoint_ts
    }

    /// A copy of the current MANIFEST.
    #[must_use]
    pub fn manifest(&self) -> Manifest {
        self.manifest.lock().clone()
    }

    /// Checkpoints the catalog as of `checkpoint_ts`.
    ///
    /// With `flush_all`, versions and segments no snapshot at or after
    /// `oldest_active_ts` can see are reclaimed afterwards.
    ///
    /// # Errors
    ///
    /// Returns the first failing step. Nothing after a failed step runs.
    pub fn checkpoint(
        &self,
        checkpoint_ts: Timestamp,
        flush_all: bool,
        oldest_active_ts: Timestamp,
    ) -> CoreResult<CheckpointInfo> {
        let mut manifest = self.manifest.lock();
        if manifest
            .last_checkpoint_ts
            .is_some_and(|last| last > checkpoint_ts)
        {
            return Err(CoreError::invalid_operation(format!(
                "checkpoint at {checkpoint_ts} is older than the last one"
            )));
        }

        let snapshot = CatalogSnapshot::capture(&self.catalog, checkpoint_ts);
        self.buffer.flush()?;

        let file_name = checkpoint_file_key(checkpoint_ts);
        let data = snapshot.encode()?;
        self.provider.write_atomic(&file_name, &data)?;
        debug!(file = %file_name, bytes = data.len(), "wrote checkpoint");

        let mut updated = manifest.clone();
        updated.last_checkpoint_ts = Some(checkpoint_ts);
        updated.checkpoint_file = Some(file_name.clone());
        updated.save(self.provider.as_ref())?;
        let previous = std::mem::replace(&mut *manifest, updated);

        self.wal.append(&WalRecord::Checkpoint(CheckpointMarker {
            checkpoint_ts,
            file_name: file_name.clone(),
        }))?;
        self.wal.flush()?;
        self.wal.rotate()?;
        let wal_files_removed = self.wal.truncate_before(checkpoint_ts)?;

        if let Some(old) = previous.checkpoint_file.filter(|old| *old != file_name) {
            self.provider.remove(&old)?;
        }

        let gc = if flush_all {
            let summary = self.catalog.collect_garbage(oldest_active_ts, &self.buffer)?;
            self.stats.record_reclaimed(summary.segments as u64);
            Some(summary)
        } else {
            None
        };

        self.stats.record_checkpoint();
        info!(
            %checkpoint_ts,
            databases = snapshot.databases.len(),
            wal_files_removed,
            flush_all,
            "checkpoint complete"
        );
        Ok(CheckpointInfo {
            checkpoint_ts,
            file_name,
            wal_files_removed,
            gc,
        })
    }
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("last_checkpoint_ts", &self.last_checkpoint_ts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{WalCmd, WalEntry};
    use crate::types::TxnId;
    use strata_storage::MemoryProvider;

    struct Fixture {
        provider: Arc<dyn BackendProvider>,
        catalog: Arc<Catalog>,
        wal: Arc<WalManager>,
        manager: CheckpointManager,
    }

    fn fixture() -> Fixture {
        let provider: Arc<dyn BackendProvider> = Arc::new(MemoryProvider::new());
        let catalog = Arc::new(Catalog::new());
        let buffer = Arc::new(BufferManager::new(Arc::clone(&provider)));
        let wal = Arc::new(WalManager::open(Arc::clone(&provider), 1 << 20, false).unwrap());
        let manager = CheckpointManager::new(
            Arc::clone(&provider),
            Arc::clone(&catalog),
            buffer,
            Arc::clone(&wal),
            Manifest::new(),
            Arc::new(StorageStats::new()),
        );
        Fixture {
            provider,
            catalog,
            wal,
            manager,
        }
    }

    fn commit(f: &Fixture, ts: u64, db_name: &str) {
        let cmd = WalCmd::CreateDatabase {
            db_name: db_name.into(),
        };
        f.wal
            .append(&WalRecord::Entry(WalEntry {
                txn_id: TxnId(ts - 1),
                commit_ts: Timestamp(ts),
                cmds: vec![cmd.clone()],
            }))
            .unwrap();
        let buffer = BufferManager::new(Arc::clone(&f.provider));
        f.catalog.apply_cmd(&cmd, Timestamp(ts), &buffer, None).unwrap();
    }

    #[test]
    fn checkpoint_truncates_wal_and_loads_back() {
        let f = fixture();
        commit(&f, 2, "db1");
        commit(&f, 3, "db2");

        let info = f.manager.checkpoint(Timestamp(4), false, Timestamp(4)).unwrap();
        assert_eq!(info.file_name, "data/checkpoint/ckp-4.cbor");
        assert_eq!(info.wal_files_removed, 1);
        assert!(info.gc.is_none());

        commit(&f, 5, "db3");
        let mut replayed = Vec::new();
        f.wal
            .replay_entries(Timestamp(4), |entry| {
                replayed.push(entry.commit_ts);
                Ok(())
            })
            .unwrap();
        assert_eq!(replayed, vec![Timestamp(5)]);

        let (manifest, snapshot) = CheckpointManager::load(f.provider.as_ref()).unwrap().unwrap();
        assert_eq!(manifest.last_checkpoint_ts, Some(Timestamp(4)));
        let names: Vec<_> = snapshot
            .unwrap()
            .databases
            .into_iter()
            .map(|d| d.db_name)
            .collect();
        assert_eq!(names, vec!["db1", "db2"]);
    }

    #[test]
    fn newer_checkpoint_replaces_older_file() {
        let f = fixture();
        commit(&f, 2, "db1");
        f.manager.checkpoint(Timestamp(3), false, Timestamp(3)).unwrap();
        commit(&f, 4, "db2");
        f.manager.checkpoint(Timestamp(5), true, Timestamp(5)).unwrap();

        assert!(!f.provider.exists(&checkpoint_file_key(Timestamp(3))));
        assert!(f.provider.exists(&checkpoint_file_key(Timestamp(5))));
        assert!(f.manager.checkpoint(Timestamp(4), false, Timestamp(4)).is_err());
    }

    #[test]
    fn missing_checkpoint_file_is_corruption() {
        let f = fixture();
        commit(&f, 2, "db1");
        f.manager.checkpoint(Timestamp(3), false, Timestamp(3)).unwrap();
        f.provider.remove(&checkpoint_file_key(Timestamp(3))).unwrap();
        assert!(matches!(
            CheckpointManager::load(f.provider.as_ref()),
            Err(CoreError::CheckpointCorruption { .. })
        ));
    }

    #[test]
    fn new_storage_has_no_manifest() {
        let provider = MemoryProvider::new();
        assert!(CheckpointManager::load(&provider).unwrap().is_none());
    }
}
