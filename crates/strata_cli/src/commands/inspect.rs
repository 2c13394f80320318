//! Inspect command implementation.

use crate::Format;
use serde::Serialize;
use std::path::Path;
use strata_core::{Storage, Txn};

/// Storage inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Storage root.
    pub path: String,
    /// Storage identity.
    pub storage_id: String,
    /// Timestamp of the last checkpoint.
    pub last_checkpoint_ts: Option<u64>,
    /// WAL files present.
    pub wal_files: usize,
    /// Entries replayed while opening.
    pub replayed_entries: u64,
    /// Snapshot the listing was taken at.
    pub snapshot_ts: u64,
    /// Databases, sorted by name.
    pub databases: Vec<DatabaseInfo>,
}

/// One database.
#[derive(Debug, Serialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Tables, sorted by name.
    pub tables: Vec<TableInfo>,
}

/// One table.
#[derive(Debug, Serialize)]
pub struct TableInfo {
    /// Table name.
    pub name: String,
    /// Column names and types.
    pub columns: Vec<String>,
    /// Visible rows.
    pub rows: u64,
    /// Live segments.
    pub segments: Vec<SegmentInfo>,
    /// Index names.
    pub indexes: Vec<String>,
}

/// One live segment.
#[derive(Debug, Serialize)]
pub struct SegmentInfo {
    /// Segment id.
    pub id: u32,
    /// Blocks in the segment.
    pub blocks: usize,
    /// Rows in the segment.
    pub rows: u64,
    /// Whether the segment is full.
    pub sealed: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let storage = super::open_existing(path)?;
    let result = collect(&storage, path)?;
    storage.close()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text(&result),
    }
    Ok(())
}

pub(crate) fn collect(
    storage: &Storage,
    path: &Path,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let txn = storage.begin_txn()?;
    let databases = list(&txn)?;
    storage.commit(&txn)?;

    Ok(InspectResult {
        path: path.display().to_string(),
        storage_id: storage.storage_id().to_string(),
        last_checkpoint_ts: storage
            .checkpointer()
            .last_checkpoint_ts()
            .map(|ts| ts.as_u64()),
        wal_files: storage.wal().files()?.len(),
        replayed_entries: storage.stats().wal_entries_replayed(),
        snapshot_ts: txn.begin_ts().as_u64(),
        databases,
    })
}

fn list(txn: &Txn) -> Result<Vec<DatabaseInfo>, Box<dyn std::error::Error>> {
    let ts = txn.begin_ts();
    let mut databases = Vec::new();
    for db_name in txn.list_databases() {
        let mut tables = Vec::new();
        for table_name in txn.list_tables(&db_name)? {
            let table = txn.get_table_entry(&db_name, &table_name)?;
            tables.push(TableInfo {
                columns: table
                    .columns()
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.logical_type))
                    .collect(),
                rows: table.row_count(ts),
                segments: table
                    .live_segments(ts)
                    .iter()
                    .map(|s| SegmentInfo {
                        id: s.segment_id(),
                        blocks: s.block_count(),
                        rows: s.row_count_at(ts),
                        sealed: s.is_sealed(),
                    })
                    .collect(),
                indexes: table
                    .list_indexes(ts)
                    .iter()
                    .map(|i| i.index_name().to_string())
                    .collect(),
                name: table_name,
            });
        }
        databases.push(DatabaseInfo {
            name: db_name,
            tables,
        });
    }
    Ok(databases)
}

fn print_text(result: &InspectResult) {
    println!("Strata Storage: {}", result.path);
    println!("==============================");
    println!("Storage id:       {}", result.storage_id);
    match result.last_checkpoint_ts {
        Some(ts) => println!("Last checkpoint:  ts:{ts}"),
        None => println!("Last checkpoint:  none"),
    }
    println!("WAL files:        {}", result.wal_files);
    println!("Replayed entries: {}", result.replayed_entries);
    println!("Snapshot:         ts:{}", result.snapshot_ts);

    for db in &result.databases {
        println!();
        println!("database {} ({} tables)", db.name, db.tables.len());
        for table in &db.tables {
            println!(
                "  table {} ({}) rows={}",
                table.name,
                table.columns.join(", "),
                table.rows
            );
            for s in &table.segments {
                println!(
                    "    segment {:>4}  blocks={:<3} rows={:<8} {}",
                    s.id,
                    s.blocks,
                    s.rows,
                    if s.sealed { "sealed" } else { "open" }
                );
            }
            if !table.indexes.is_empty() {
                println!("    indexes: {}", table.indexes.join(", "));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_codec::LogicalType;
    use strata_core::{ColumnDef, Config, ConflictType, TableDef, DEFAULT_DATABASE};
    use tempfile::tempdir;

    #[test]
    fn lists_tables_of_default_database() {
        let temp = tempdir().unwrap();
        let storage = Storage::open(temp.path(), Config::default().sync_on_commit(false)).unwrap();
        let txn = storage.begin_txn().unwrap();
        txn.create_table(
            DEFAULT_DATABASE,
            TableDef::new("t1", vec![ColumnDef::new(0, "v", LogicalType::Integer)]),
            ConflictType::Error,
        )
        .unwrap();
        storage.commit(&txn).unwrap();

        let result = collect(&storage, temp.path()).unwrap();
        assert_eq!(result.databases.len(), 1);
        assert_eq!(result.databases[0].tables[0].name, "t1");
        assert_eq!(result.databases[0].tables[0].rows, 0);
        assert!(serde_json::to_string(&result).unwrap().contains("\"t1\""));
    }
}
