//! Compact command implementation.

use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, db: &str, table: &str) -> Result<(), Box<dyn std::error::Error>> {
    let storage = super::open_existing(path)?;
    let info = storage.compact_table(db, table)?;
    storage.close()?;

    match info.output_segment {
        Some(output) => println!(
            "Compacted {db}.{table}: segments {:?} -> {output} at {}",
            info.inputs, info.commit_ts
        ),
        None => println!("{db}.{table} has no live segments"),
    }
    Ok(())
}
