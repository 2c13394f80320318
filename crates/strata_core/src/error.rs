//! Error types for the storage core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] strata_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A live database with this name already exists.
    #[error("duplicate database: {name}")]
    DuplicateDatabase {
        /// Database name.
        name: String,
    },

    /// A live table with this name already exists in the database.
    #[error("duplicate table: {db_name}.{table_name}")]
    DuplicateTable {
        /// Database name.
        db_name: String,
        /// Table name.
        table_name: String,
    },

    /// A live index with this name already exists on the table.
    #[error("duplicate index: {index_name} on {table_name}")]
    DuplicateIndex {
        /// Table name.
        table_name: String,
        /// Index name.
        index_name: String,
    },

    /// No database with this name is visible.
    #[error("database not found: {name}")]
    DatabaseNotFound {
        /// Database name.
        name: String,
    },

    /// No table with this name is visible in the database.
    #[error("table not found: {db_name}.{table_name}")]
    TableNotFound {
        /// Database name.
        db_name: String,
        /// Table name.
        table_name: String,
    },

    /// No index with this name is visible on the table.
    #[error("index not found: {index_name} on {table_name}")]
    IndexNotFound {
        /// Table name.
        table_name: String,
        /// Index name.
        index_name: String,
    },

    /// No segment with this id exists in the table.
    #[error("segment not found: {segment_id} in {table_name}")]
    SegmentNotFound {
        /// Table name.
        table_name: String,
        /// Segment id.
        segment_id: u32,
    },

    /// No block with this id exists in the segment.
    #[error("block not found: {block_id} in segment {segment_id}")]
    BlockNotFound {
        /// Segment id.
        segment_id: u32,
        /// Block id.
        block_id: u16,
    },

    /// No column with this id or name exists in the table.
    #[error("column not found: {column}")]
    ColumnNotFound {
        /// Column id or name.
        column: String,
    },

    /// Commit-time validation found a conflicting concurrent commit.
    #[error("transaction {txn_id} conflicts: {reason}")]
    TxnConflict {
        /// The transaction that failed validation.
        txn_id: u64,
        /// What it conflicted on.
        reason: String,
    },

    /// Buffer or file layer failure.
    #[error("data I/O error: {message}")]
    DataIo {
        /// Description of the failure.
        message: String,
    },

    /// An internal invariant does not hold.
    #[error("unrecoverable error: {message}")]
    Unrecoverable {
        /// Description of the violated invariant.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The index definition is malformed or does not fit the table.
    #[error("invalid index definition: {message}")]
    InvalidIndexDefinition {
        /// What is wrong with it.
        message: String,
    },

    /// Appended data does not match the table's columns.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// What differs.
        message: String,
    },

    /// The feature is not supported.
    #[error("not supported: {feature}")]
    NotSupported {
        /// The unsupported feature.
        feature: String,
    },

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checkpoint file or MANIFEST is corrupted or invalid.
    #[error("checkpoint corruption: {message}")]
    CheckpointCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Another process holds the storage directory.
    #[error("storage locked: another process has exclusive access")]
    DatabaseLocked,

    /// Storage is closed.
    #[error("storage is closed")]
    StorageClosed,

    /// A background task failed.
    #[error("background task {task} failed: {message}")]
    TaskFailed {
        /// Task name.
        task: String,
        /// The task's error.
        message: String,
    },
}

impl CoreError {
    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates a checkpoint corruption error.
    pub fn checkpoint_corruption(message: impl Into<String>) -> Self {
        Self::CheckpointCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an unrecoverable error.
    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self::Unrecoverable {
            message: message.into(),
        }
    }

    /// Creates a data I/O error.
    pub fn data_io(message: impl Into<String>) -> Self {
        Self::DataIo {
            message: message.into(),
        }
    }

    /// Creates a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Creates an invalid index definition error.
    pub fn invalid_index(message: impl Into<String>) -> Self {
        Self::InvalidIndexDefinition {
            message: message.into(),
        }
    }

    /// Creates a not supported error.
    pub fn not_supported(feature: impl Into<String>) -> Self {
        Self::NotSupported {
            feature: feature.into(),
        }
    }

    /// Creates a transaction conflict error.
    pub fn txn_conflict(txn_id: u64, reason: impl Into<String>) -> Self {
        Self::TxnConflict {
            txn_id,
            reason: reason.into(),
        }
    }

    /// Whether retrying the transaction from scratch may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TxnConflict { .. })
    }
}
