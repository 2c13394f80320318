//! Streaming WAL record iterator.
//!
//! Reads records one by one from a WAL file through a bounded buffer, so
//! replay memory does not grow with the log.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{WalRecord, WalRecordType, CRC_SIZE, HEADER_SIZE, WAL_MAGIC, WAL_VERSION};
use strata_storage::StorageBackend;

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A streaming iterator over the records of one WAL file.
///
/// Yields `(offset, record)` pairs.
///
/// - A truncated header or payload ends iteration cleanly; see
///   [`WalRecordIterator::truncated`].
/// - Bad magic, a newer version, an unknown type or a checksum mismatch is
///   an error and ends iteration.
pub struct WalRecordIterator<'a> {
    backend: &'a dyn StorageBackend,
    total_size: u64,
    current_offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    finished: bool,
    truncated: bool,
}

impl<'a> WalRecordIterator<'a> {
    /// Creates an iterator starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: &'a dyn StorageBackend, start_offset: u64) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            current_offset: start_offset,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
            truncated: false,
        })
    }

    /// End of the last complete record read so far.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.current_offset
    }

    /// Whether iteration stopped at an incomplete trailing record.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Ensures `min_bytes` are buffered from the current position.
    ///
    /// Returns `false` at end of file. Grows the buffer for records larger
    /// than it.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let remaining_in_file = (self.total_size - self.current_offset) as usize - available;
        if remaining_in_file < min_bytes - available {
            return Ok(false);
        }

        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let bytes_to_read = (self.buffer.len() - self.buffer_len).min(remaining_in_file);
        if bytes_to_read > 0 {
            let read_offset = self.current_offset + self.buffer_len as u64;
            let data = self.backend.read_at(read_offset, bytes_to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    fn read_next_record(&mut self) -> CoreResult<Option<(u64, WalRecord)>> {
        if self.finished {
            return Ok(None);
        }
        let record_start = self.current_offset;
        if record_start == self.total_size {
            self.finished = true;
            return Ok(None);
        }

        if !self.ensure_buffered(HEADER_SIZE)? {
            self.finished = true;
            self.truncated = true;
            return Ok(None);
        }

        let header = &self.buffer[self.buffer_pos..self.buffer_pos + HEADER_SIZE];
        if header[0..4] != WAL_MAGIC {
            return Err(CoreError::wal_corruption(format!(
                "invalid magic at offset {record_start}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {record_start}"
            )));
        }

        let type_byte = header[6];
        let record_type = WalRecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::wal_corruption(format!(
                "unknown record type {type_byte} at offset {record_start}"
            ))
        })?;

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if !self.ensure_buffered(total_len)? {
            self.finished = true;
            self.truncated = true;
            return Ok(None);
        }

        let payload_start = self.buffer_pos + HEADER_SIZE;
        let payload_end = payload_start + payload_len;
        let stored_crc = u32::from_le_bytes([
            self.buffer[payload_end],
            self.buffer[payload_end + 1],
            self.buffer[payload_end + 2],
            self.buffer[payload_end + 3],
        ]);
        let computed_crc = crc32fast::hash(&self.buffer[self.buffer_pos..payload_end]);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let record = WalRecord::decode_payload(record_type, &self.buffer[payload_start..payload_end])?;

        self.buffer_pos += total_len;
        self.current_offset += total_len as u64;
        Ok(Some((record_start, record)))
    }
}

impl Iterator for WalRecordIterator<'_> {
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
