//! WAL record types and serialization.

use crate::catalog::{BlockLayout, IndexDef, TableDef};
use crate::data::DataBlock;
use crate::error::{CoreError, CoreResult};
use crate::types::{SegmentId, Timestamp, TxnId};
use serde::{Deserialize, Serialize};
use strata_codec::{from_cbor, to_cbor};

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"SWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4).
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// A committed transaction.
    Entry = 1,
    /// Checkpoint marker.
    Checkpoint = 2,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Entry),
            2 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One logged operation of a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalCmd {
    /// Create a database.
    CreateDatabase {
        /// Database name.
        db_name: String,
    },
    /// Drop a database.
    DropDatabase {
        /// Database name.
        db_name: String,
    },
    /// Create a table.
    CreateTable {
        /// Owning database.
        db_name: String,
        /// Schema.
        table_def: TableDef,
        /// Block and segment sizing in force when the table was created.
        layout: BlockLayout,
    },
    /// Drop a table.
    DropTable {
        /// Owning database.
        db_name: String,
        /// Table name.
        table_name: String,
    },
    /// Append rows to the open segment.
    Append {
        /// Owning database.
        db_name: String,
        /// Table name.
        table_name: String,
        /// The rows.
        block: DataBlock,
    },
    /// Bulk-load rows as one new sealed segment.
    Import {
        /// Owning database.
        db_name: String,
        /// Table name.
        table_name: String,
        /// The rows, in order.
        blocks: Vec<DataBlock>,
    },
    /// Create an index.
    CreateIndex {
        /// Owning database.
        db_name: String,
        /// Table name.
        table_name: String,
        /// Definition.
        index_def: IndexDef,
        /// Segments the index must be built over.
        covered_segments: Vec<SegmentId>,
    },
    /// Drop an index.
    DropIndex {
        /// Owning database.
        db_name: String,
        /// Table name.
        table_name: String,
        /// Index name.
        index_name: String,
    },
    /// Replace segments with one merged segment.
    Compact {
        /// Owning database.
        db_name: String,
        /// Table name.
        table_name: String,
        /// Input segments, in merge order.
        inputs: Vec<SegmentId>,
        /// Rows in the merged output.
        row_count: u64,
    },
}

impl WalCmd {
    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateDatabase { .. } => "create_database",
            Self::DropDatabase { .. } => "drop_database",
            Self::CreateTable { .. } => "create_table",
            Self::DropTable { .. } => "drop_table",
            Self::Append { .. } => "append",
            Self::Import { .. } => "import",
            Self::CreateIndex { .. } => "create_index",
            Self::DropIndex { .. } => "drop_index",
            Self::Compact { .. } => "compact",
        }
    }
}

/// Every operation of one committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Committing transaction.
    pub txn_id: TxnId,
    /// Commit timestamp; increases along the log.
    pub commit_ts: Timestamp,
    /// Operations in staging order.
    pub cmds: Vec<WalCmd>,
}

/// Marks a durable checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMarker {
    /// Timestamp of the captured catalog.
    pub checkpoint_ts: Timestamp,
    /// Checkpoint file, relative to the storage root.
    pub file_name: String,
}

/// A WAL record.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    /// A committed transaction.
    Entry(WalEntry),
    /// A completed checkpoint.
    Checkpoint(CheckpointMarker),
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Entry(_) => WalRecordType::Entry,
            Self::Checkpoint(_) => WalRecordType::Checkpoint,
        }
    }

    /// Commit timestamp of an entry, or the captured timestamp of a marker.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Entry(entry) => entry.commit_ts,
            Self::Checkpoint(marker) => marker.checkpoint_ts,
        }
    }

    /// Serializes the record payload (without envelope).
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let payload = match self {
            Self::Entry(entry) => to_cbor(entry)?,
            Self::Checkpoint(marker) => to_cbor(marker)?,
        };
        Ok(payload)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let record = match record_type {
            WalRecordType::Entry => Self::Entry(
                from_cbor(payload).map_err(|e| CoreError::wal_corruption(format!("bad entry: {e}")))?,
            ),
            WalRecordType::Checkpoint => Self::Checkpoint(
                from_cbor(payload)
                    .map_err(|e| CoreError::wal_corruption(format!("bad checkpoint marker: {e}")))?,
            ),
        };
        Ok(record)
    }

    /// Serializes the record with its envelope.
    ///
    /// ```text
    /// | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
    /// ```
    ///
    /// The checksum covers everything before it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the payload does not fit the 4-byte
    /// length field.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("WAL record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&WAL_MAGIC);
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}
