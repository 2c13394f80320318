//! Concurrent load drivers for Strata.
//!
//! These run many committing threads against one storage and report how
//! many commits succeeded, conflicted or failed.

use crate::fixtures::{commit_with, int_block};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use strata_core::{CoreError, Storage};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Committed transactions.
    pub committed: usize,
    /// Transactions rejected by conflict detection.
    pub conflicts: usize,
    /// Transactions that failed for another reason.
    pub failed: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Commits per second.
    pub fn commits_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.committed as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Committed: {}", self.committed);
        println!("Conflicts: {}", self.conflicts);
        println!("Failed: {}", self.failed);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} commits/sec", self.commits_per_second());
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Committing threads.
    pub threads: usize,
    /// Transactions per thread.
    pub txns_per_thread: usize,
    /// Rows per append.
    pub rows_per_txn: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            txns_per_thread: 100,
            rows_per_txn: 8,
        }
    }
}

#[derive(Default)]
struct Counters {
    committed: AtomicUsize,
    conflicts: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn record(&self, result: Result<(), CoreError>) {
        let counter = match result {
            Ok(()) => &self.committed,
            Err(CoreError::TxnConflict { .. }) => &self.conflicts,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(self, start: Instant) -> StressTestResult {
        StressTestResult {
            committed: self.committed.into_inner(),
            conflicts: self.conflicts.into_inner(),
            failed: self.failed.into_inner(),
            duration: start.elapsed(),
        }
    }
}

/// Appends to one existing table from every thread.
///
/// Appends never conflict with each other, so every transaction should
/// commit.
pub fn stress_concurrent_appends(
    storage: &Storage,
    db_name: &str,
    table_name: &str,
    config: &StressConfig,
) -> StressTestResult {
    let counters = Counters::default();
    let values: Vec<i32> = (0..config.rows_per_txn as i32).collect();
    let start = Instant::now();

    thread::scope(|s| {
        for _ in 0..config.threads {
            s.spawn(|| {
                for _ in 0..config.txns_per_thread {
                    let result = commit_with(storage, |txn| {
                        txn.append(db_name, table_name, int_block(&values))
                    });
                    counters.record(result.map(|_| ()));
                }
            });
        }
    });

    counters.finish(start)
}

/// Every thread creates and drops the same database.
///
/// Create and drop both take the database key exclusively, so overlapping
/// transactions conflict and the surviving state stays consistent.
pub fn stress_contended_ddl(storage: &Storage, db_name: &str, config: &StressConfig) -> StressTestResult {
    use strata_core::ConflictType;

    let counters = Counters::default();
    let start = Instant::now();

    thread::scope(|s| {
        for worker in 0..config.threads {
            let counters = &counters;
            s.spawn(move || {
                for i in 0..config.txns_per_thread {
                    let result = commit_with(storage, |txn| {
                        if (worker + i) % 2 == 0 {
                            txn.create_database(db_name, ConflictType::Ignore)
                        } else {
                            txn.drop_database(db_name, ConflictType::Ignore)
                        }
                    });
                    counters.record(result.map(|_| ()));
                }
            });
        }
    });

    counters.finish(start)
}
