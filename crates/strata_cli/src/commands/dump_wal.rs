//! Dump-wal command implementation.

use crate::Format;
use serde::Serialize;
use std::path::Path;
use strata_core::wal::{WalRecordIterator, WAL_DIR};
use strata_core::{StorageDir, WalCmd, WalRecord};
use strata_storage::BackendProvider;

/// One WAL record, flattened for printing.
#[derive(Debug, Serialize)]
pub struct RecordSummary {
    /// WAL file key.
    pub file: String,
    /// Byte offset within the file.
    pub offset: u64,
    /// `entry` or `checkpoint`.
    pub kind: &'static str,
    /// Transaction id, for entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<u64>,
    /// Commit or checkpoint timestamp.
    pub ts: u64,
    /// One line per command, or the checkpoint file.
    pub detail: Vec<String>,
}

/// Runs the dump-wal command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = StorageDir::open(path, false)?;
    let provider = dir.provider()?;
    let records = collect(&provider, limit.unwrap_or(usize::MAX))?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        Format::Text => {
            for r in &records {
                let txn = r.txn_id.map(|id| format!(" txn:{id}")).unwrap_or_default();
                println!("{}@{:<8} {:<10} ts:{}{txn}", r.file, r.offset, r.kind, r.ts);
                for line in &r.detail {
                    println!("    {line}");
                }
            }
            println!("{} records", records.len());
        }
    }
    Ok(())
}

pub(crate) fn collect(
    provider: &dyn BackendProvider,
    limit: usize,
) -> Result<Vec<RecordSummary>, Box<dyn std::error::Error>> {
    let mut records = Vec::new();
    for file in provider.list(WAL_DIR)? {
        let backend = provider.open(&file)?;
        for item in WalRecordIterator::new(backend.as_ref(), 0)? {
            if records.len() >= limit {
                return Ok(records);
            }
            let (offset, record) = item?;
            records.push(summarize(&file, offset, &record));
        }
    }
    Ok(records)
}

fn summarize(file: &str, offset: u64, record: &WalRecord) -> RecordSummary {
    match record {
        WalRecord::Entry(entry) => RecordSummary {
            file: file.to_string(),
            offset,
            kind: "entry",
            txn_id: Some(entry.txn_id.as_u64()),
            ts: entry.commit_ts.as_u64(),
            detail: entry.cmds.iter().map(describe).collect(),
        },
        WalRecord::Checkpoint(marker) => RecordSummary {
            file: file.to_string(),
            offset,
            kind: "checkpoint",
            txn_id: None,
            ts: marker.checkpoint_ts.as_u64(),
            detail: vec![marker.file_name.clone()],
        },
    }
}

fn describe(cmd: &WalCmd) -> String {
    let target = match cmd {
        WalCmd::CreateDatabase { db_name } | WalCmd::DropDatabase { db_name } => db_name.clone(),
        WalCmd::CreateTable {
            db_name, table_def, ..
        } => format!("{db_name}.{} ({} columns)", table_def.table_name, table_def.columns.len()),
        WalCmd::DropTable {
            db_name,
            table_name,
        } => format!("{db_name}.{table_name}"),
        WalCmd::Append {
            db_name,
            table_name,
            block,
        } => format!("{db_name}.{table_name} rows={}", block.row_count()),
        WalCmd::Import {
            db_name,
            table_name,
            blocks,
        } => format!(
            "{db_name}.{table_name} rows={}",
            blocks.iter().map(|b| b.row_count()).sum::<usize>()
        ),
        WalCmd::CreateIndex {
            db_name,
            table_name,
            index_def,
            covered_segments,
        } => format!(
            "{db_name}.{table_name}.{} covering {covered_segments:?}",
            index_def.index_name
        ),
        WalCmd::DropIndex {
            db_name,
            table_name,
            index_name,
        } => format!("{db_name}.{table_name}.{index_name}"),
        WalCmd::Compact {
            db_name,
            table_name,
            inputs,
            row_count,
        } => format!("{db_name}.{table_name} inputs={inputs:?} rows={row_count}"),
    };
    format!("{} {target}", cmd.name())
}
