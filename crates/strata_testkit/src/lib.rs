//! # Strata Testkit
//!
//! Test utilities for Strata.
//!
//! This crate provides:
//! - [`TestStorage`], a storage in a temporary directory that can be
//!   restarted in place
//! - schema and data helpers for the common test tables
//! - proptest strategies for rows and blocks
//! - WAL damage helpers for crash tests
//! - concurrent load drivers
//!
//! ## Usage
//!
//! ```rust
//! use strata_core::{ConflictType, DEFAULT_DATABASE};
//! use strata_testkit::prelude::*;
//!
//! let mut storage = TestStorage::new();
//! commit_with(&storage, |txn| {
//!     txn.create_table(DEFAULT_DATABASE, int_table("t1"), ConflictType::Error)?;
//!     txn.append(DEFAULT_DATABASE, "t1", int_block(&[1, 2, 3]))
//! })
//! .unwrap();
//!
//! storage.reopen();
//! assert_eq!(table_row_count(&storage, DEFAULT_DATABASE, "t1"), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
