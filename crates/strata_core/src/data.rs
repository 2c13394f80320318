//! In-memory row batches staged by appends and produced by compaction.

use crate::catalog::ColumnDef;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use strata_codec::{LogicalType, Value};

/// Values of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnVector {
    logical_type: LogicalType,
    values: Vec<Value>,
}

impl ColumnVector {
    /// Creates an empty vector of the given type.
    #[must_use]
    pub fn new(logical_type: LogicalType) -> Self {
        Self {
            logical_type,
            values: Vec::new(),
        }
    }

    /// Creates a vector from existing values.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if a value does not fit `logical_type`.
    pub fn with_values(logical_type: LogicalType, values: Vec<Value>) -> CoreResult<Self> {
        if let Some(bad) = values.iter().find(|v| !v.fits(logical_type)) {
            return Err(CoreError::schema_mismatch(format!(
                "{} value in {logical_type} column",
                bad.logical_type()
            )));
        }
        Ok(Self {
            logical_type,
            values,
        })
    }

    /// Appends one value.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the value does not fit the column type.
    pub fn append(&mut self, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        if !value.fits(self.logical_type) {
            return Err(CoreError::schema_mismatch(format!(
                "{} value in {} column",
                value.logical_type(),
                self.logical_type
            )));
        }
        self.values.push(value);
        Ok(())
    }

    /// Column type.
    #[must_use]
    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    /// All values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the vector holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn extend_from(&mut self, other: &Self) {
        self.values.extend_from_slice(&other.values);
    }
}

/// A batch of rows, stored column by column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBlock {
    columns: Vec<ColumnVector>,
}

impl DataBlock {
    /// Creates an empty block with one column per type.
    #[must_use]
    pub fn new(types: &[LogicalType]) -> Self {
        Self {
            columns: types.iter().copied().map(ColumnVector::new).collect(),
        }
    }

    /// Creates a block from column vectors of equal length.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the columns differ in length.
    pub fn from_columns(columns: Vec<ColumnVector>) -> CoreResult<Self> {
        if let Some(first) = columns.first() {
            if columns.iter().any(|c| c.len() != first.len()) {
                return Err(CoreError::schema_mismatch("columns differ in length"));
            }
        }
        Ok(Self { columns })
    }

    /// Appends a row.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the row width or a value type is wrong.
    /// The block is unchanged on error.
    pub fn append_row(&mut self, row: Vec<Value>) -> CoreResult<()> {
        if row.len() != self.columns.len() {
            return Err(CoreError::schema_mismatch(format!(
                "row has {} values, block has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (value, column) in row.iter().zip(&self.columns) {
            if !value.fits(column.logical_type) {
                return Err(CoreError::schema_mismatch(format!(
                    "{} value in {} column",
                    value.logical_type(),
                    column.logical_type
                )));
            }
        }
        for (value, column) in row.into_iter().zip(&mut self.columns) {
            column.values.push(value);
        }
        Ok(())
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, ColumnVector::len)
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column by position.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&ColumnVector> {
        self.columns.get(index)
    }

    /// All columns.
    #[must_use]
    pub fn columns(&self) -> &[ColumnVector] {
        &self.columns
    }

    /// Column types in order.
    #[must_use]
    pub fn types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(ColumnVector::logical_type).collect()
    }

    /// Row `index` as values.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<Vec<Value>> {
        self.columns
            .iter()
            .map(|c| c.values.get(index).cloned())
            .collect()
    }

    /// Appends every row of `other`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the column types differ.
    pub fn extend(&mut self, other: &Self) -> CoreResult<()> {
        if self.types() != other.types() {
            return Err(CoreError::schema_mismatch("blocks have different column types"));
        }
        for (column, source) in self.columns.iter_mut().zip(&other.columns) {
            column.extend_from(source);
        }
        Ok(())
    }

    /// Checks that the block's columns match a table definition.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` naming the first differing column.
    pub fn check_schema(&self, columns: &[ColumnDef]) -> CoreResult<()> {
        if self.columns.len() != columns.len() {
            return Err(CoreError::schema_mismatch(format!(
                "block has {} columns, table has {}",
                self.columns.len(),
                columns.len()
            )));
        }
        for (vector, def) in self.columns.iter().zip(columns) {
            if vector.logical_type != def.logical_type {
                return Err(CoreError::schema_mismatch(format!(
                    "column {} is {}, block has {}",
                    def.name, def.logical_type, vector.logical_type
                )));
            }
        }
        Ok(())
    }
}
