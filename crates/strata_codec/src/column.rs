//! Fixed-width column layout.
//!
//! Every row occupies [`LogicalType::fixed_width`] bytes of the fixed part,
//! little-endian. Varchar rows store a slot `| heap offset (8) | len (4) |`
//! and append their bytes to the heap. Offsets are absolute within the heap
//! file, so a caller appending to an existing column passes the current heap
//! size as `heap_base`.

use crate::error::{CodecError, CodecResult};
use crate::types::LogicalType;
use crate::value::Value;

/// Width of a varchar slot in the fixed part.
pub const VARCHAR_SLOT_WIDTH: usize = 12;

/// Encoded rows of one column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedColumn {
    /// Fixed-width row bytes.
    pub fixed: Vec<u8>,
    /// Heap bytes referenced by varchar slots.
    pub heap: Vec<u8>,
}

/// Encodes `values` for a column of type `ty`.
///
/// # Errors
///
/// Returns [`CodecError::TypeMismatch`] if a value does not fit `ty`.
pub fn encode_column(ty: LogicalType, values: &[Value], heap_base: u64) -> CodecResult<EncodedColumn> {
    let mut out = EncodedColumn {
        fixed: Vec::with_capacity(values.len() * ty.fixed_width()),
        heap: Vec::new(),
    };

    for value in values {
        if !value.fits(ty) {
            return Err(CodecError::type_mismatch(ty, value.logical_type()));
        }
        match value {
            Value::Bool(v) => out.fixed.push(u8::from(*v)),
            Value::TinyInt(v) => out.fixed.extend_from_slice(&v.to_le_bytes()),
            Value::SmallInt(v) => out.fixed.extend_from_slice(&v.to_le_bytes()),
            Value::Integer(v) => out.fixed.extend_from_slice(&v.to_le_bytes()),
            Value::BigInt(v) => out.fixed.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => out.fixed.extend_from_slice(&v.to_le_bytes()),
            Value::Double(v) => out.fixed.extend_from_slice(&v.to_le_bytes()),
            Value::Varchar(s) => {
                let len = u32::try_from(s.len())
                    .map_err(|_| CodecError::encoding_failed("varchar longer than 4 GiB"))?;
                let offset = heap_base + out.heap.len() as u64;
                out.fixed.extend_from_slice(&offset.to_le_bytes());
                out.fixed.extend_from_slice(&len.to_le_bytes());
                out.heap.extend_from_slice(s.as_bytes());
            }
            Value::Embedding(v) => {
                for x in v {
                    out.fixed.extend_from_slice(&x.to_le_bytes());
                }
            }
        }
    }
    Ok(out)
}

/// Decodes every row of a column of type `ty`.
///
/// # Errors
///
/// Returns an error if `fixed` is not a whole number of rows, a varchar slot
/// points outside `heap`, or varchar bytes are not UTF-8.
pub fn decode_column(ty: LogicalType, fixed: &[u8], heap: &[u8]) -> CodecResult<Vec<Value>> {
    let width = ty.fixed_width();
    if width == 0 || fixed.len() % width != 0 {
        return Err(CodecError::RaggedColumn {
            len: fixed.len(),
            width,
        });
    }

    fixed
        .chunks_exact(width)
        .map(|row| decode_row(ty, row, heap))
        .collect()
}

fn le<const N: usize>(row: &[u8], at: usize) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&row[at..at + N]);
    buf
}

fn decode_row(ty: LogicalType, row: &[u8], heap: &[u8]) -> CodecResult<Value> {
    let value = match ty {
        LogicalType::Boolean => Value::Bool(row[0] != 0),
        LogicalType::TinyInt => Value::TinyInt(i8::from_le_bytes(le(row, 0))),
        LogicalType::SmallInt => Value::SmallInt(i16::from_le_bytes(le(row, 0))),
        LogicalType::Integer => Value::Integer(i32::from_le_bytes(le(row, 0))),
        LogicalType::BigInt => Value::BigInt(i64::from_le_bytes(le(row, 0))),
        LogicalType::Float => Value::Float(f32::from_le_bytes(le(row, 0))),
        LogicalType::Double => Value::Double(f64::from_le_bytes(le(row, 0))),
        LogicalType::Varchar => {
            let offset = u64::from_le_bytes(le(row, 0));
            let len = u32::from_le_bytes(le(row, 8));
            let start = usize::try_from(offset).unwrap_or(usize::MAX);
            let end = start.saturating_add(len as usize);
            let bytes = heap.get(start..end).ok_or(CodecError::HeapOutOfBounds {
                offset,
                len,
                heap_len: heap.len(),
            })?;
            let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
            Value::Varchar(s.to_string())
        }
        LogicalType::Embedding { .. } => Value::Embedding(
            row.chunks_exact(4)
                .map(|c| f32::from_le_bytes(le(c, 0)))
                .collect(),
        ),
    };
    Ok(value)
}
