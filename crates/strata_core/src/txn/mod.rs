//! Transactions with snapshot isolation.
//!
//! A [`Txn`] reads the catalog as of its begin timestamp and stages its
//! writes as WAL commands. [`TxnManager::commit_txn`] runs the pipeline:
//!
//! 1. validate the write set against commits newer than the snapshot
//! 2. append one WAL entry
//! 3. apply the commands to the catalog
//! 4. publish the commit timestamp
//!
//! Transactions begun after step 4 see the commit; those begun before it
//! never do.

mod conflict;
mod manager;
mod state;
mod store;
mod transaction;

pub use conflict::{ConflictKey, LockMode, WriteSet};
pub use manager::TxnManager;
pub use state::TxnState;
pub use transaction::Txn;
