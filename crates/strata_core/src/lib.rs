//! # Strata Core
//!
//! Multi-version transactional storage for a columnar engine.
//!
//! This crate provides:
//! - a versioned catalog (databases, tables, segments, blocks, indexes)
//! - snapshot-isolated transactions with write-set conflict detection
//! - a write-ahead log with checkpoints and crash recovery
//! - background checkpointing and segment compaction
//!
//! Open a [`Storage`], begin a [`Txn`], stage work, and commit it:
//!
//! ```rust
//! use strata_core::{ConflictType, Storage};
//!
//! let storage = Storage::open_in_memory().unwrap();
//! let txn = storage.begin_txn().unwrap();
//! txn.create_database("db1", ConflictType::Ignore).unwrap();
//! storage.commit(&txn).unwrap();
//!
//! let reader = storage.begin_txn().unwrap();
//! assert_eq!(reader.list_databases(), vec!["db1", "default"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bg;
mod block_index;
mod buffer;
pub mod catalog;
pub mod checkpoint;
mod config;
mod data;
mod dir;
mod error;
mod stats;
mod storage;
pub mod txn;
mod types;
pub mod wal;

pub use bg::{BgTask, BgTaskProcessor, CompactSegmentsTask, ForceCheckpointTask, TaskHandle};
pub use block_index::BlockIndex;
pub use buffer::{BufferManager, ColumnData, ColumnHandle};
pub use catalog::{
    BlockEntry, BlockLayout, Catalog, ColumnDef, DatabaseEntry, EntryType, IndexBase, IndexDef,
    SegmentEntry, TableDef, TableEntry, TableIndexEntry,
};
pub use checkpoint::{CheckpointInfo, CheckpointManager, Manifest};
pub use config::{Config, DEFAULT_BLOCK_CAPACITY, DEFAULT_SEGMENT_CAPACITY};
pub use data::{ColumnVector, DataBlock};
pub use dir::StorageDir;
pub use error::{CoreError, CoreResult};
pub use stats::{StatsSnapshot, StorageStats};
pub use storage::{CompactionInfo, Storage, DEFAULT_DATABASE};
pub use txn::{Txn, TxnManager, TxnState};
pub use types::{
    BlockId, ColumnId, ConflictType, GlobalBlockId, SegmentId, Timestamp, TxnId, UNCOMMIT_TS,
};
pub use wal::{WalCmd, WalEntry, WalManager, WalRecord};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
