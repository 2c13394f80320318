use super::{BgTask, TaskHandle};
use crate::catalog::TableEntry;
use crate::error::CoreResult;
use crate::txn::Txn;
use crate::types::SegmentId;
use std::sync::Arc;
use tracing::debug;

/// Merges segments of one table into a single new segment.
///
/// `execute` reads the inputs at the transaction's snapshot and stages the
/// merge in the transaction. Nothing changes until the transaction commits;
/// the output segment id is assigned then, above every existing id.
pub struct CompactSegmentsTask {
    table: Arc<TableEntry>,
    txn: Arc<Txn>,
    inputs: Vec<SegmentId>,
    handle: TaskHandle,
}

impl CompactSegmentsTask {
    /// Targets every segment of `table` live at the snapshot of `txn`.
    #[must_use]
    pub fn make_task_with_whole_table(table: Arc<TableEntry>, txn: Arc<Txn>) -> Self {
        let inputs = table
            .live_segments(txn.begin_ts())
            .iter()
            .map(|segment| segment.segment_id())
            .collect();
        Self {
            table,
            txn,
            inputs,
            handle: TaskHandle::new("compact segments"),
        }
    }

    /// Segments to merge, in merge order.
    #[must_use]
    pub fn inputs(&self) -> &[SegmentId] {
        &self.inputs
    }

    /// Blocks until the merge is staged.
    ///
    /// # Errors
    ///
    /// Returns `TaskFailed` if reading or staging failed; the transaction
    /// then holds no compaction.
    pub fn wait(&self) -> CoreResult<()> {
        self.handle.wait()
    }
}

impl BgTask for CompactSegmentsTask {
    fn name(&self) -> &'static str {
        "compact segments"
    }

    fn execute(&self) -> CoreResult<()> {
        if self.inputs.is_empty() {
            return Ok(());
        }
        let merged =
            self.table
                .merge_segments(&self.inputs, self.txn.begin_ts(), self.txn.buffer())?;
        debug!(
            table = %self.table.table_name(),
            inputs = self.inputs.len(),
            rows = merged.row_count(),
            "merged segments"
        );
        self.txn.stage_compaction(
            self.table.db_name(),
            self.table.table_name(),
            self.inputs.clone(),
            merged,
        )
    }

    fn handle(&self) -> &TaskHandle {
        &self.handle
    }
}
