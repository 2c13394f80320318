//! # Strata Codec
//!
//! Value types and byte layouts shared by the Strata storage engine.
//!
//! - [`LogicalType`] and [`Value`] describe typed column data.
//! - [`encode_column`] / [`decode_column`] convert between values and the
//!   fixed-width column layout written through the buffer manager. Varchar
//!   rows keep a `(offset, len)` slot in the fixed part and their bytes in a
//!   separate heap.
//! - [`to_cbor`] / [`from_cbor`] serialize WAL payloads and checkpoint
//!   snapshots.
//!
//! ## Usage
//!
//! ```
//! use strata_codec::{decode_column, encode_column, LogicalType, Value};
//!
//! let values = vec![Value::BigInt(22), Value::BigInt(-1)];
//! let encoded = encode_column(LogicalType::BigInt, &values, 0).unwrap();
//! assert_eq!(encoded.fixed.len(), 16);
//!
//! let decoded = decode_column(LogicalType::BigInt, &encoded.fixed, &encoded.heap).unwrap();
//! assert_eq!(decoded, values);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod column;
mod error;
mod types;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use column::{decode_column, encode_column, EncodedColumn, VARCHAR_SLOT_WIDTH};
pub use error::{CodecError, CodecResult};
pub use types::LogicalType;
pub use value::Value;
