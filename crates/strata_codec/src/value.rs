//! Typed column values.

use crate::types::LogicalType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell of a table column.
///
/// Columns are non-nullable, so every variant carries data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// 8-bit integer.
    TinyInt(i8),
    /// 16-bit integer.
    SmallInt(i16),
    /// 32-bit integer.
    Integer(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    Varchar(String),
    /// Vector of `f32`.
    Embedding(Vec<f32>),
}

impl Value {
    /// Returns the logical type this value belongs to.
    #[must_use]
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Self::Bool(_) => LogicalType::Boolean,
            Self::TinyInt(_) => LogicalType::TinyInt,
            Self::SmallInt(_) => LogicalType::SmallInt,
            Self::Integer(_) => LogicalType::Integer,
            Self::BigInt(_) => LogicalType::BigInt,
            Self::Float(_) => LogicalType::Float,
            Self::Double(_) => LogicalType::Double,
            Self::Varchar(_) => LogicalType::Varchar,
            Self::Embedding(v) => LogicalType::Embedding {
                dimension: v.len() as u32,
            },
        }
    }

    /// Whether this value can be stored in a column of type `ty`.
    #[must_use]
    pub fn fits(&self, ty: LogicalType) -> bool {
        self.logical_type() == ty
    }

    /// Returns the value as `i64` if it is an integer of any width.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::TinyInt(v) => Some(i64::from(v)),
            Self::SmallInt(v) => Some(i64::from(v)),
            Self::Integer(v) => Some(i64::from(v)),
            Self::BigInt(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value as `f64` if it is a float of either width.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(f64::from(v)),
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the string if this is a varchar.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Varchar(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::TinyInt(v) => write!(f, "{v}"),
            Self::SmallInt(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Varchar(v) => write!(f, "{v:?}"),
            Self::Embedding(v) => write!(f, "{v:?}"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        })*
    };
}

impl_from!(
    bool => Bool,
    i8 => TinyInt,
    i16 => SmallInt,
    i32 => Integer,
    i64 => BigInt,
    f32 => Float,
    f64 => Double,
    String => Varchar,
    Vec<f32> => Embedding,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Varchar(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_types() {
        assert_eq!(Value::from(1_i8).logical_type(), LogicalType::TinyInt);
        assert_eq!(Value::from("x").logical_type(), LogicalType::Varchar);
        assert_eq!(
            Value::from(vec![1.0_f32, 2.0, 3.0]).logical_type(),
            LogicalType::Embedding { dimension: 3 }
        );
    }

    #[test]
    fn fits_rejects_other_widths() {
        assert!(Value::BigInt(22).fits(LogicalType::BigInt));
        assert!(!Value::Integer(22).fits(LogicalType::BigInt));
        assert!(!Value::Embedding(vec![0.0; 2]).fits(LogicalType::Embedding { dimension: 3 }));
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::SmallInt(-3).as_i64(), Some(-3));
        assert_eq!(Value::Float(0.5).as_f64(), Some(0.5));
        assert_eq!(Value::Double(1.0).as_i64(), None);
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
    }
}
