//! Write-Ahead Log (WAL) for durability and crash recovery.
//!
//! Every committed write transaction produces exactly one [`WalEntry`],
//! appended in commit order and flushed before the commit is acknowledged.
//! On open the catalog is rebuilt from the last checkpoint plus the entries
//! logged after it.
//!
//! ## WAL Record Format
//!
//! ```text
//! | magic "SWAL" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Payloads are CBOR. Records live in numbered files `wal/wal-<seq>.log`;
//! a file is closed once it reaches the configured size.
//!
//! ## Recovery Policy
//!
//! ### Tolerated (treated as end of log)
//!
//! - Truncated header or payload at the end of the newest file. This is a
//!   crash mid-write; the commit was never acknowledged.
//!
//! ### Fatal (open fails)
//!
//! - Checksum mismatch, bad magic, unknown record type, newer format
//!   version, or a truncated record in a closed file.
//!
//! ## Invariants
//!
//! - Records are never modified after write.
//! - `commit_ts` increases along the log.
//! - Replay applies entries through the same path as commit, so it is
//!   deterministic.

mod iterator;
mod record;
mod writer;

pub use iterator::WalRecordIterator;
pub use record::{
    CheckpointMarker, WalCmd, WalEntry, WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION,
};
pub use writer::{wal_file_key, WalManager, WAL_DIR};
