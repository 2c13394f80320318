//! # Strata Storage
//!
//! Byte-level storage for the Strata engine.
//!
//! Backends are **opaque byte stores**: they append, read at an offset,
//! truncate and sync. They know nothing about column layouts, WAL records or
//! checkpoint snapshots. A [`BackendProvider`] hands out backends by key
//! (`"wal/wal-000001.log"`, `"data/db/tbl/seg_0/blk_0/col_0.col"`) so the
//! engine can run against a directory tree or entirely in memory.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use strata_storage::{BackendProvider, MemoryProvider, StorageBackend};
//!
//! let provider = MemoryProvider::new();
//! let mut backend = provider.open("data/col_0.col").unwrap();
//! let offset = backend.append(b"hello world").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod provider;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{sync_directory, write_atomic, FileBackend};
pub use memory::InMemoryBackend;
pub use provider::{BackendProvider, FileProvider, MemoryProvider};
