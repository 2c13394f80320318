//! CLI command implementations.

pub mod checkpoint;
pub mod compact;
pub mod dump_wal;
pub mod inspect;
pub mod verify;

use std::path::Path;
use strata_core::{Config, Storage};

/// Opens an existing storage for maintenance.
pub(crate) fn open_existing(path: &Path) -> Result<Storage, Box<dyn std::error::Error>> {
    Ok(Storage::open(path, Config::default().create_if_missing(false))?)
}
