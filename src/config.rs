//! Storage configuration
//!
//! Supplied once when a database is opened and fixed afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::DEFAULT_BLOCK_SIZE;

/// Default number of buffers in the pool
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 8;

/// Default lock and buffer wait, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default log file name
pub const DEFAULT_LOG_FILE: &str = "arcstore.log";

/// Smallest block that still leaves room for useful log records
pub const MIN_BLOCK_SIZE: usize = 64;

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding data and log files
    pub data_dir: PathBuf,
    /// Bytes per block
    pub block_size: usize,
    /// Number of buffers in the pool
    pub buffer_pool_size: usize,
    /// How long a lock request may wait
    pub lock_timeout_ms: u64,
    /// How long a pin may wait for a free buffer
    pub buffer_timeout_ms: u64,
    /// Log file name inside `data_dir`
    pub log_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("arcstore-data"),
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
            lock_timeout_ms: DEFAULT_TIMEOUT_MS,
            buffer_timeout_ms: DEFAULT_TIMEOUT_MS,
            log_file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl StorageConfig {
    /// Create a config with default values for the given directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load a config from a JSON file; missing fields take default values
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Set the data directory
    pub fn data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Set the block size
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the buffer pool size
    pub fn buffer_pool_size(mut self, buffer_pool_size: usize) -> Self {
        self.buffer_pool_size = buffer_pool_size;
        self
    }

    /// Set both the lock and the buffer wait timeout
    pub fn timeout(self, timeout: Duration) -> Self {
        self.lock_timeout(timeout).buffer_timeout(timeout)
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn buffer_timeout(mut self, timeout: Duration) -> Self {
        self.buffer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the log file name
    pub fn log_file(mut self, log_file: impl Into<String>) -> Self {
        self.log_file = log_file.into();
        self
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn buffer_wait(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE || self.block_size > i32::MAX as usize {
            return Err(Error::Config(format!(
                "block size {} must be between {} and {}",
                self.block_size,
                MIN_BLOCK_SIZE,
                i32::MAX
            )));
        }
        if self.buffer_pool_size == 0 {
            return Err(Error::Config("buffer pool needs at least one buffer".into()));
        }
        if self.log_file.is_empty() {
            return Err(Error::Config("log file name is empty".into()));
        }
        Ok(())
    }
}
