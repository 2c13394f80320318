//! Logical column types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    /// `bool`, one byte per row.
    Boolean,
    /// `i8`.
    TinyInt,
    /// `i16`.
    SmallInt,
    /// `i32`.
    Integer,
    /// `i64`.
    BigInt,
    /// `f32`.
    Float,
    /// `f64`.
    Double,
    /// UTF-8 string stored in the column heap.
    Varchar,
    /// Fixed-dimension `f32` vector.
    Embedding {
        /// Number of elements per row.
        dimension: u32,
    },
}

impl LogicalType {
    /// Bytes each row occupies in the fixed part of a column.
    #[must_use]
    pub const fn fixed_width(self) -> usize {
        match self {
            Self::Boolean | Self::TinyInt => 1,
            Self::SmallInt => 2,
            Self::Integer | Self::Float => 4,
            Self::BigInt | Self::Double => 8,
            Self::Varchar => crate::column::VARCHAR_SLOT_WIDTH,
            Self::Embedding { dimension } => dimension as usize * 4,
        }
    }

    /// Whether rows spill bytes into a heap.
    #[must_use]
    pub const fn has_heap(self) -> bool {
        matches!(self, Self::Varchar)
    }

    /// Whether the type is an embedding.
    #[must_use]
    pub const fn is_embedding(self) -> bool {
        matches!(self, Self::Embedding { .. })
    }

    /// Whether the type is numeric (integers and floats).
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::TinyInt
                | Self::SmallInt
                | Self::Integer
                | Self::BigInt
                | Self::Float
                | Self::Double
        )
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "Boolean"),
            Self::TinyInt => write!(f, "TinyInt"),
            Self::SmallInt => write!(f, "SmallInt"),
            Self::Integer => write!(f, "Integer"),
            Self::BigInt => write!(f, "BigInt"),
            Self::Float => write!(f, "Float"),
            Self::Double => write!(f, "Double"),
            Self::Varchar => write!(f, "Varchar"),
            Self::Embedding { dimension } => write!(f, "Embedding({dimension})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        assert_eq!(LogicalType::TinyInt.fixed_width(), 1);
        assert_eq!(LogicalType::BigInt.fixed_width(), 8);
        assert_eq!(LogicalType::Double.fixed_width(), 8);
        assert_eq!(LogicalType::Varchar.fixed_width(), 12);
        assert_eq!(LogicalType::Embedding { dimension: 4 }.fixed_width(), 16);
    }

    #[test]
    fn display() {
        assert_eq!(LogicalType::SmallInt.to_string(), "SmallInt");
        assert_eq!(
            LogicalType::Embedding { dimension: 128 }.to_string(),
            "Embedding(128)"
        );
    }
}
