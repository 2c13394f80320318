//! Column data access by handle.
//!
//! Every block column owns two storage objects under `data/`: `<key>.col`
//! with fixed-width rows and, for varchar columns, `<key>.heap`. Writes are
//! positional by row so replaying the same append is harmless: rows at or
//! past `row_offset` are cut and rewritten.

use crate::error::{CoreError, CoreResult};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use strata_codec::{decode_column, encode_column, LogicalType, Value, VARCHAR_SLOT_WIDTH};
use strata_storage::{BackendProvider, StorageBackend};
use tracing::debug;

/// Names the storage of one block column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnHandle {
    key: String,
    logical_type: LogicalType,
}

impl ColumnHandle {
    /// Creates a handle for the column stored under `key`.
    #[must_use]
    pub fn new(key: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            key: key.into(),
            logical_type,
        }
    }

    /// Storage key prefix.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Column type.
    #[must_use]
    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    fn fixed_key(&self) -> String {
        format!("{}.col", self.key)
    }

    fn heap_key(&self) -> String {
        format!("{}.heap", self.key)
    }
}

/// A contiguous readable view of a column.
#[derive(Debug, Clone)]
pub struct ColumnData {
    logical_type: LogicalType,
    fixed: Bytes,
    heap: Bytes,
}

impl ColumnData {
    /// Rows physically present.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.fixed.len() / self.logical_type.fixed_width()
    }

    /// Fixed-width bytes.
    #[must_use]
    pub fn fixed(&self) -> &Bytes {
        &self.fixed
    }

    /// Decodes the first `rows` rows.
    ///
    /// # Errors
    ///
    /// Returns `DataIo` if fewer rows are present, or a codec error.
    pub fn decode(&self, rows: usize) -> CoreResult<Vec<Value>> {
        if rows > self.row_count() {
            return Err(CoreError::data_io(format!(
                "column holds {} rows, {rows} requested",
                self.row_count()
            )));
        }
        let width = self.logical_type.fixed_width();
        Ok(decode_column(
            self.logical_type,
            &self.fixed[..rows * width],
            &self.heap,
        )?)
    }
}

struct ColumnFiles {
    fixed: Box<dyn StorageBackend>,
    heap: Option<Box<dyn StorageBackend>>,
    width: u64,
}

impl ColumnFiles {
    fn rows(&self) -> CoreResult<u64> {
        Ok(self.fixed.size()? / self.width)
    }

    /// Heap size needed by the first `rows` rows.
    fn heap_end(&self, rows: u64) -> CoreResult<u64> {
        if rows == 0 {
            return Ok(0);
        }
        let slot = self
            .fixed
            .read_at((rows - 1) * self.width, VARCHAR_SLOT_WIDTH)?;
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&slot[..8]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&slot[8..12]);
        Ok(u64::from_le_bytes(offset) + u64::from(u32::from_le_bytes(len)))
    }
}

/// Opens, appends and reads column data by handle.
pub struct BufferManager {
    provider: Arc<dyn BackendProvider>,
    columns: RwLock<HashMap<String, Arc<Mutex<ColumnFiles>>>>,
}

impl BufferManager {
    /// Creates a buffer manager storing columns through `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn BackendProvider>) -> Self {
        Self {
            provider,
            columns: RwLock::new(HashMap::new()),
        }
    }

    /// Opens (creating if needed) the storage of a column.
    ///
    /// # Errors
    ///
    /// Returns `DataIo` if the files cannot be opened.
    pub fn open_column(&self, handle: &ColumnHandle) -> CoreResult<()> {
        self.files(handle).map(|_| ())
    }

    fn files(&self, handle: &ColumnHandle) -> CoreResult<Arc<Mutex<ColumnFiles>>> {
        if let Some(files) = self.columns.read().get(handle.key()) {
            return Ok(Arc::clone(files));
        }

        let mut columns = self.columns.write();
        if let Some(files) = columns.get(handle.key()) {
            return Ok(Arc::clone(files));
        }
        let fixed = self
            .provider
            .open(&handle.fixed_key())
            .map_err(|e| CoreError::data_io(format!("open {}: {e}", handle.fixed_key())))?;
        let heap = if handle.logical_type().has_heap() {
            Some(
                self.provider
                    .open(&handle.heap_key())
                    .map_err(|e| CoreError::data_io(format!("open {}: {e}", handle.heap_key())))?,
            )
        } else {
            None
        };
        let files = Arc::new(Mutex::new(ColumnFiles {
            fixed,
            heap,
            width: handle.logical_type().fixed_width() as u64,
        }));
        columns.insert(handle.key().to_string(), Arc::clone(&files));
        Ok(files)
    }

    /// Writes `source` as rows `row_offset..row_offset + source.len()`.
    ///
    /// Rows already stored at or after `row_offset` are replaced.
    ///
    /// # Errors
    ///
    /// Returns `DataIo` if the column has fewer than `row_offset` rows or a
    /// write fails, and a codec error if a value does not fit the column.
    pub fn append_column_data(
        &self,
        handle: &ColumnHandle,
        source: &[Value],
        row_offset: u64,
    ) -> CoreResult<()> {
        let files = self.files(handle)?;
        let mut files = files.lock();

        let present = files.rows()?;
        if present < row_offset {
            return Err(CoreError::data_io(format!(
                "{} holds {present} rows, cannot write at row {row_offset}",
                handle.key()
            )));
        }
        if present > row_offset || files.fixed.size()? != present * files.width {
            let heap_end = if files.heap.is_some() {
                files.heap_end(row_offset)?
            } else {
                0
            };
            debug!(column = handle.key(), present, row_offset, "rewriting column tail");
            let width = files.width;
            files.fixed.truncate(row_offset * width)?;
            if let Some(heap) = files.heap.as_mut() {
                heap.truncate(heap_end)?;
            }
        }

        let heap_base = match files.heap.as_ref() {
            Some(heap) => heap.size()?,
            None => 0,
        };
        let encoded = encode_column(handle.logical_type(), source, heap_base)?;
        files.fixed.append(&encoded.fixed)?;
        if let Some(heap) = files.heap.as_mut() {
            heap.append(&encoded.heap)?;
        }
        Ok(())
    }

    /// Returns every stored row of the column.
    ///
    /// # Errors
    ///
    /// Returns `DataIo` if the column cannot be read.
    pub fn get_column_data(&self, handle: &ColumnHandle) -> CoreResult<ColumnData> {
        let files = self.files(handle)?;
        let files = files.lock();
        let fixed = files.fixed.read_all()?;
        let heap = match files.heap.as_ref() {
            Some(heap) => heap.read_all()?,
            None => Vec::new(),
        };
        Ok(ColumnData {
            logical_type: handle.logical_type(),
            fixed: Bytes::from(fixed),
            heap: Bytes::from(heap),
        })
    }

    /// Rows physically stored for the column.
    ///
    /// # Errors
    ///
    /// Returns `DataIo` if the column cannot be opened.
    pub fn column_row_count(&self, handle: &ColumnHandle) -> CoreResult<u64> {
        self.files(handle)?.lock().rows()
    }

    /// Syncs every open column.
    ///
    /// # Errors
    ///
    /// Returns the first sync failure.
    pub fn flush(&self) -> CoreResult<()> {
        let columns: Vec<_> = self.columns.read().values().cloned().collect();
        for files in columns {
            let mut files = files.lock();
            files.fixed.sync()?;
            if let Some(heap) = files.heap.as_mut() {
                heap.sync()?;
            }
        }
        Ok(())
    }

    /// Deletes all columns stored below `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `DataIo` if the removal fails.
    pub fn remove_prefix(&self, prefix: &str) -> CoreResult<()> {
        let below = format!("{prefix}/");
        self.columns.write().retain(|key, _| !key.starts_with(&below));
        self.provider
            .remove_prefix(prefix)
            .map_err(|e| CoreError::data_io(format!("remove {prefix}: {e}")))
    }

    /// Number of columns with open files.
    #[must_use]
    pub fn open_column_count(&self) -> usize {
        self.columns.read().len()
    }
}

impl fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferManager")
            .field("provider", &self.provider)
            .field("open_columns", &self.open_column_count())
            .finish_non_exhaustive()
    }
}
