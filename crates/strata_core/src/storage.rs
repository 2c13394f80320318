//! Storage facade and recovery.

use crate::bg::{BgTaskProcessor, CompactSegmentsTask, ForceCheckpointTask, PeriodicTask};
use crate::buffer::BufferManager;
use crate::catalog::{BlockLayout, Catalog};
use crate::checkpoint::{CheckpointInfo, CheckpointManager, Manifest};
use crate::config::Config;
use crate::dir::StorageDir;
use crate::error::{CoreError, CoreResult};
use crate::stats::StorageStats;
use crate::txn::{Txn, TxnManager};
use crate::types::{ConflictType, SegmentId, Timestamp};
use crate::wal::{WalManager, WAL_DIR};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use strata_storage::{BackendProvider, MemoryProvider};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Database created when a storage is initialized.
pub const DEFAULT_DATABASE: &str = "default";

/// Outcome of [`Storage::compact_table`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionInfo {
    /// Segments merged, in merge order.
    pub inputs: Vec<SegmentId>,
    /// Segment holding the merged rows, if anything was merged.
    pub output_segment: Option<SegmentId>,
    /// Commit timestamp of the compaction.
    pub commit_ts: Timestamp,
}

/// An opened storage.
///
/// ```rust,ignore
/// use strata_core::{ConflictType, Storage};
///
/// let storage = Storage::open(Path::new("my_store"), Config::default())?;
/// let txn = storage.begin_txn()?;
/// txn.create_database("db1", ConflictType::Ignore)?;
/// storage.commit(&txn)?;
/// storage.close()?;
/// ```
pub struct Storage {
    config: Config,
    /// Holds the directory lock; `None` for provider-backed storage.
    dir: Option<StorageDir>,
    storage_id: Uuid,
    catalog: Arc<Catalog>,
    buffer: Arc<BufferManager>,
    wal: Arc<WalManager>,
    checkpointer: Arc<CheckpointManager>,
    txn_manager: Arc<TxnManager>,
    bg: BgTaskProcessor,
    stats: Arc<StorageStats>,
    closed: AtomicBool,
}

impl Storage {
    /// Opens the storage at `path`, recovering it if it exists.
    ///
    /// # Errors
    ///
    /// - `DatabaseLocked` if another process has it open.
    /// - `InvalidOperation` if it is missing and `create_if_missing` is
    ///   off, or it exists and `error_if_exists` is on.
    /// - `CheckpointCorruption`, `WalCorruption` or `Unrecoverable` if
    ///   recovery fails.
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = StorageDir::open(path, config.create_if_missing)?;
        let is_new = dir.is_new_storage();
        check_existence(is_new, &config, &path.display().to_string())?;
        if is_new {
            dir.create_layout()?;
        }
        let provider: Arc<dyn BackendProvider> = Arc::new(dir.provider()?);
        Self::recover(Some(dir), provider, config, is_new)
    }

    /// Opens a storage over any provider.
    ///
    /// Reopening the same [`MemoryProvider`] simulates a restart.
    ///
    /// # Errors
    ///
    /// As [`Storage::open`], except for locking.
    pub fn open_with_provider(
        provider: Arc<dyn BackendProvider>,
        config: Config,
    ) -> CoreResult<Self> {
        let is_new = !provider.exists(crate::checkpoint::MANIFEST_KEY)
            && provider.list(WAL_DIR)?.is_empty();
        check_existence(is_new, &config, "provider")?;
        Self::recover(None, provider, config, is_new)
    }

    /// Opens a fresh storage held in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_provider(
            Arc::new(MemoryProvider::new()),
            Config::default().sync_on_commit(false),
        )
    }

    fn recover(
        dir: Option<StorageDir>,
        provider: Arc<dyn BackendProvider>,
        config: Config,
        is_new: bool,
    ) -> CoreResult<Self> {
        let started = Instant::now();
        let (manifest, snapshot) = match CheckpointManager::load(provider.as_ref())? {
            Some(loaded) => loaded,
            None => {
                let manifest = Manifest::new();
                manifest.save(provider.as_ref())?;
                (manifest, None)
            }
        };
        if manifest.format_version.0 != Manifest::new().format_version.0 {
            return Err(CoreError::invalid_operation(format!(
                "unsupported storage format v{}.{}",
                manifest.format_version.0, manifest.format_version.1
            )));
        }

        let (catalog, checkpoint_ts) = match &snapshot {
            Some(snapshot) => (snapshot.restore()?, snapshot.checkpoint_ts),
            None => (Catalog::new(), Timestamp::ZERO),
        };
        let catalog = Arc::new(catalog);
        let buffer = Arc::new(BufferManager::new(Arc::clone(&provider)));
        let wal = Arc::new(WalManager::open(
            Arc::clone(&provider),
            config.max_wal_file_size,
            config.sync_on_commit,
        )?);
        let stats = Arc::new(StorageStats::new());

        let mut last_ts = checkpoint_ts;
        let mut replayed = 0u64;
        wal.replay_entries(checkpoint_ts, |entry| {
            for cmd in &entry.cmds {
                catalog
                    .apply_cmd(cmd, entry.commit_ts, &buffer, None)
                    .map_err(|e| {
                        CoreError::unrecoverable(format!(
                            "replaying {} of {} at {}: {e}",
                            cmd.name(),
                            entry.txn_id,
                            entry.commit_ts
                        ))
                    })?;
            }
            debug!(txn_id = %entry.txn_id, commit_ts = %entry.commit_ts, "replayed entry");
            last_ts = last_ts.max(entry.commit_ts);
            replayed += 1;
            Ok(())
        })?;
        stats.record_replayed(replayed);

        let layout = BlockLayout {
            block_capacity: config.block_capacity,
            segment_capacity: config.segment_capacity,
        };
        let txn_manager = Arc::new(TxnManager::new(
            Arc::clone(&catalog),
            Arc::clone(&buffer),
            Arc::clone(&wal),
            Arc::clone(&stats),
            layout,
            Timestamp(last_ts.as_u64() + 1),
        ));
        let checkpointer = Arc::new(CheckpointManager::new(
            Arc::clone(&provider),
            Arc::clone(&catalog),
            Arc::clone(&buffer),
            Arc::clone(&wal),
            manifest.clone(),
            Arc::clone(&stats),
        ));

        let periodic = config.checkpoint_interval.map(|interval| {
            let txn_manager = Arc::clone(&txn_manager);
            let checkpointer = Arc::clone(&checkpointer);
            let wal = Arc::clone(&wal);
            PeriodicTask::new("periodic checkpoint", interval, move || {
                if wal.current_size() == 0 {
                    return Ok(());
                }
                let txn = txn_manager.begin_txn()?;
                let result = checkpointer.checkpoint(
                    txn.begin_ts(),
                    false,
                    txn_manager.oldest_active_ts(),
                );
                txn_manager.commit_txn(&txn)?;
                result.map(|_| ())
            })
        });
        let bg = BgTaskProcessor::start(config.bg_queue_capacity, Arc::clone(&stats), periodic)?;

        let storage = Self {
            config,
            dir,
            storage_id: manifest.storage_id,
            catalog,
            buffer,
            wal,
            checkpointer,
            txn_manager,
            bg,
            stats,
            closed: AtomicBool::new(false),
        };

        if is_new {
            let txn = storage.begin_txn()?;
            txn.create_database(DEFAULT_DATABASE, ConflictType::Ignore)?;
            storage.commit(&txn)?;
        }

        info!(
            storage_id = %storage.storage_id,
            checkpoint_ts = %checkpoint_ts,
            replayed,
            next_ts = %storage.txn_manager.next_ts(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "storage opened"
        );
        Ok(storage)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::StorageClosed);
        }
        Ok(())
    }

    /// Creates and begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageClosed` after [`Storage::close`].
    pub fn begin_txn(&self) -> CoreResult<Arc<Txn>> {
        self.ensure_open()?;
        self.txn_manager.begin_txn()
    }

    /// Commits `txn`.
    ///
    /// # Errors
    ///
    /// See [`TxnManager::commit_txn`].
    pub fn commit(&self, txn: &Txn) -> CoreResult<Timestamp> {
        self.ensure_open()?;
        self.txn_manager.commit_txn(txn)
    }

    /// Rolls back `txn`.
    ///
    /// # Errors
    ///
    /// See [`TxnManager::rollback_txn`].
    pub fn rollback(&self, txn: &Txn) -> CoreResult<()> {
        self.txn_manager.rollback_txn(txn)
    }

    /// Checkpoints through the background worker and waits for it.
    ///
    /// With `flush_all`, versions no active transaction can see are
    /// reclaimed afterwards.
    ///
    /// # Errors
    ///
    /// Returns `TaskFailed` if the checkpoint failed.
    pub fn checkpoint(&self, flush_all: bool) -> CoreResult<CheckpointInfo> {
        self.ensure_open()?;
        let txn = self.txn_manager.begin_txn()?;
        let task = Arc::new(ForceCheckpointTask::new(
            Arc::clone(&self.checkpointer),
            Arc::clone(&self.txn_manager),
            Arc::clone(&txn),
            flush_all,
        ));
        let result = self.bg.submit(task.clone()).and_then(|()| task.wait());
        match result {
            Ok(info) => {
                self.txn_manager.commit_txn(&txn)?;
                Ok(info)
            }
            Err(e) => {
                self.txn_manager.rollback_txn(&txn)?;
                Err(e)
            }
        }
    }

    /// Merges every live segment of a table into one.
    ///
    /// # Errors
    ///
    /// Returns the lookup error, `TaskFailed` if merging failed, or
    /// `TxnConflict` if a concurrent commit touched the table.
    pub fn compact_table(&self, db_name: &str, table_name: &str) -> CoreResult<CompactionInfo> {
        self.ensure_open()?;
        let txn = self.txn_manager.begin_txn()?;
        let result = self.run_compaction(&txn, db_name, table_name);
        let inputs = match result {
            Ok(inputs) => inputs,
            Err(e) => {
                self.txn_manager.rollback_txn(&txn)?;
                return Err(e);
            }
        };
        let commit_ts = self.txn_manager.commit_txn(&txn)?;
        let output_segment = if inputs.is_empty() {
            None
        } else {
            self.stats.record_compaction();
            self.catalog
                .get_table(db_name, table_name, commit_ts)?
                .live_segments(commit_ts)
                .iter()
                .find(|segment| segment.min_row_ts() == commit_ts)
                .map(|segment| segment.segment_id())
        };
        info!(
            db = db_name,
            table = table_name,
            ?inputs,
            ?output_segment,
            %commit_ts,
            "compaction committed"
        );
        Ok(CompactionInfo {
            inputs,
            output_segment,
            commit_ts,
        })
    }

    fn run_compaction(
        &self,
        txn: &Arc<Txn>,
        db_name: &str,
        table_name: &str,
    ) -> CoreResult<Vec<SegmentId>> {
        let table = txn.get_table_entry(db_name, table_name)?;
        let task = Arc::new(CompactSegmentsTask::make_task_with_whole_table(
            table,
            Arc::clone(txn),
        ));
        self.bg.submit(task.clone())?;
        task.wait()?;
        Ok(task.inputs().to_vec())
    }

    /// Stops the background worker and flushes the WAL and column files.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first flush error.
    pub fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.bg.stop();
        self.wal.flush()?;
        self.buffer.flush()?;
        if self.txn_manager.active_txn_count() > 0 {
            warn!(
                active = self.txn_manager.active_txn_count(),
                "closing with unfinished transactions"
            );
        }
        info!(storage_id = %self.storage_id, "storage closed");
        Ok(())
    }

    /// Whether [`Storage::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Root directory, for directory-backed storage.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.path().to_path_buf())
    }

    /// Identity fixed when the storage was created.
    #[must_use]
    pub fn storage_id(&self) -> Uuid {
        self.storage_id
    }

    /// Configuration the storage was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Transaction manager.
    #[must_use]
    pub fn txn_manager(&self) -> &Arc<TxnManager> {
        &self.txn_manager
    }

    /// The catalog. Reads must pass a begun transaction's timestamp.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Buffer manager.
    #[must_use]
    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer
    }

    /// Background processor.
    #[must_use]
    pub fn bg_processor(&self) -> &BgTaskProcessor {
        &self.bg
    }

    /// Checkpoint manager.
    #[must_use]
    pub fn checkpointer(&self) -> &Arc<CheckpointManager> {
        &self.checkpointer
    }

    /// Write-ahead log.
    #[must_use]
    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    /// Runtime counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<StorageStats> {
        &self.stats
    }
}

fn check_existence(is_new: bool, config: &Config, location: &str) -> CoreResult<()> {
    if is_new && !config.create_if_missing {
        return Err(CoreError::invalid_operation(format!(
            "no storage at {location} and create_if_missing is off"
        )));
    }
    if !is_new && config.error_if_exists {
        return Err(CoreError::invalid_operation(format!(
            "storage at {location} exists and error_if_exists is on"
        )));
    }
    Ok(())
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("storage_id", &self.storage_id)
            .field("path", &self.path())
            .field("closed", &self.is_closed())
            .field("txn_manager", &self.txn_manager)
            .finish_non_exhaustive()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing storage");
        }
    }
}
