use super::{BgTask, TaskHandle};
use crate::checkpoint::{CheckpointInfo, CheckpointManager};
use crate::error::{CoreError, CoreResult};
use crate::txn::{Txn, TxnManager, TxnState};
use parking_lot::Mutex;
use std::sync::Arc;

/// Checkpoints the catalog at the begin timestamp of a started transaction.
///
/// The transaction pins the snapshot: every commit below its begin
/// timestamp is applied before it starts. The caller commits or rolls it
/// back once [`ForceCheckpointTask::wait`] returns.
pub struct ForceCheckpointTask {
    checkpointer: Arc<CheckpointManager>,
    txn_manager: Arc<TxnManager>,
    txn: Arc<Txn>,
    flush_all: bool,
    info: Mutex<Option<CheckpointInfo>>,
    handle: TaskHandle,
}

impl ForceCheckpointTask {
    /// Creates the task. With `flush_all`, unreachable versions are
    /// reclaimed after the checkpoint.
    #[must_use]
    pub fn new(
        checkpointer: Arc<CheckpointManager>,
        txn_manager: Arc<TxnManager>,
        txn: Arc<Txn>,
        flush_all: bool,
    ) -> Self {
        Self {
            checkpointer,
            txn_manager,
            txn,
            flush_all,
            info: Mutex::new(None),
            handle: TaskHandle::new("force checkpoint"),
        }
    }

    /// Blocks until the checkpoint finished.
    ///
    /// # Errors
    ///
    /// Returns `TaskFailed` if the checkpoint failed.
    pub fn wait(&self) -> CoreResult<CheckpointInfo> {
        self.handle.wait()?;
        self.info
            .lock()
            .clone()
            .ok_or_else(|| CoreError::unrecoverable("checkpoint finished without a result"))
    }
}

impl BgTask for ForceCheckpointTask {
    fn name(&self) -> &'static str {
        "force checkpoint"
    }

    fn execute(&self) -> CoreResult<()> {
        if self.txn.state() != TxnState::Started {
            return Err(CoreError::invalid_operation(format!(
                "checkpoint needs a started transaction, {} is {}",
                self.txn.txn_id(),
                self.txn.state()
            )));
        }
        let info = self.checkpointer.checkpoint(
            self.txn.begin_ts(),
            self.flush_all,
            self.txn_manager.oldest_active_ts(),
        )?;
        *self.info.lock() = Some(info);
        Ok(())
    }

    fn handle(&self) -> &TaskHandle {
        &self.handle
    }
}
