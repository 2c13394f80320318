//! Property-based test generators using proptest.
//!
//! Provides strategies for names, rows and blocks that satisfy the storage's
//! validation rules.

use crate::fixtures::{int_block, typed_block};
use proptest::prelude::*;
use strata_core::DataBlock;

/// Strategy for valid database and table names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for a non-empty block of [`crate::int_table`] rows.
pub fn int_block_strategy(max_rows: usize) -> impl Strategy<Value = DataBlock> {
    prop::collection::vec(any::<i32>(), 1..=max_rows.max(1)).prop_map(|values| int_block(&values))
}

/// Strategy for a non-empty block of [`crate::typed_table`] rows.
pub fn typed_block_strategy(max_rows: usize) -> impl Strategy<Value = DataBlock> {
    prop::collection::vec(
        (any::<i8>(), any::<i64>(), -1.0e9f64..1.0e9),
        1..=max_rows.max(1),
    )
    .prop_map(|rows| typed_block(&rows))
}

/// Strategy for a sequence of append batches, as row values.
pub fn append_batches_strategy(
    max_batches: usize,
    max_rows: usize,
) -> impl Strategy<Value = Vec<Vec<i32>>> {
    prop::collection::vec(
        prop::collection::vec(any::<i32>(), 1..=max_rows.max(1)),
        1..=max_batches.max(1),
    )
}
