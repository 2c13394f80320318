//! Checkpoint command implementation.

use std::path::Path;

/// Runs the checkpoint command.
pub fn run(path: &Path, full: bool) -> Result<(), Box<dyn std::error::Error>> {
    let storage = super::open_existing(path)?;
    let info = storage.checkpoint(full)?;
    storage.close()?;

    println!("Checkpoint at {}", info.checkpoint_ts);
    println!("  file:              {}", info.file_name);
    println!("  WAL files removed: {}", info.wal_files_removed);
    if let Some(gc) = info.gc {
        println!(
            "  reclaimed:         {} databases, {} tables, {} segments",
            gc.databases, gc.tables, gc.segments
        );
    }
    Ok(())
}
