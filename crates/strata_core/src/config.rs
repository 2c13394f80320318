//! Storage configuration.

use std::time::Duration;

/// Rows per block unless configured otherwise.
pub const DEFAULT_BLOCK_CAPACITY: u32 = 8192;

/// Blocks per segment unless configured otherwise.
pub const DEFAULT_SEGMENT_CAPACITY: u16 = 16;

/// Configuration for opening a storage directory.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to initialize the directory if it holds no storage yet.
    pub create_if_missing: bool,

    /// Whether to error if the directory already holds a storage.
    pub error_if_exists: bool,

    /// Size at which the active WAL file is closed and a new one started.
    pub max_wal_file_size: u64,

    /// How often the background worker checkpoints (`None` = never).
    pub checkpoint_interval: Option<Duration>,

    /// Whether to fsync the WAL on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Rows per block.
    pub block_capacity: u32,

    /// Blocks per segment before it is sealed.
    pub segment_capacity: u16,

    /// Maximum number of queued background tasks.
    pub bg_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            max_wal_file_size: 64 * 1024 * 1024, // 64 MB
            checkpoint_interval: None,
            sync_on_commit: true,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            bg_queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to initialize a missing storage.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if the storage exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the WAL file rotation size.
    #[must_use]
    pub const fn max_wal_file_size(mut self, size: u64) -> Self {
        self.max_wal_file_size = size;
        self
    }

    /// Sets the periodic checkpoint interval.
    #[must_use]
    pub const fn checkpoint_interval(mut self, interval: Option<Duration>) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Sets whether to sync WAL on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the number of rows per block.
    #[must_use]
    pub const fn block_capacity(mut self, rows: u32) -> Self {
        self.block_capacity = rows;
        self
    }

    /// Sets the number of blocks per segment.
    #[must_use]
    pub const fn segment_capacity(mut self, blocks: u16) -> Self {
        self.segment_capacity = blocks;
        self
    }

    /// Sets the background queue length.
    #[must_use]
    pub const fn bg_queue_capacity(mut self, tasks: usize) -> Self {
        self.bg_queue_capacity = tasks;
        self
    }

    /// Rows a segment holds before it is sealed.
    #[must_use]
    pub const fn segment_row_capacity(&self) -> u64 {
        self.block_capacity as u64 * self.segment_capacity as u64
    }
}
