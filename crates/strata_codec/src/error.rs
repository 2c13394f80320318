//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A value does not match the column type it was written to.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The column type.
        expected: String,
        /// The value's type.
        actual: String,
    },

    /// A byte buffer is not a whole number of rows.
    #[error("column buffer of {len} bytes is not a multiple of row width {width}")]
    RaggedColumn {
        /// Buffer length.
        len: usize,
        /// Expected row width.
        width: usize,
    },

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A heap slot points outside the heap.
    #[error("heap slot {offset}+{len} outside heap of {heap_len} bytes")]
    HeapOutOfBounds {
        /// Slot offset.
        offset: u64,
        /// Slot length.
        len: u32,
        /// Heap size.
        heap_len: usize,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
