//! CBOR serialization for persisted engine structures.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes `value` to CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Deserializes a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not a valid
/// encoding of `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LogicalType, Value};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        columns: Vec<LogicalType>,
        values: Vec<Value>,
    }

    #[test]
    fn row_round_trip() {
        let row = Row {
            columns: vec![LogicalType::TinyInt, LogicalType::Embedding { dimension: 2 }],
            values: vec![Value::TinyInt(1), Value::Embedding(vec![0.5, 1.5])],
        };
        let bytes = to_cbor(&row).unwrap();
        assert_eq!(from_cbor::<Row>(&bytes).unwrap(), row);
    }

    #[test]
    fn garbage_is_rejected() {
        let result = from_cbor::<Row>(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }
}
