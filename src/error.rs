//! Error types for ArcStore
//!
//! This module defines all error types used by the storage and transaction engine.

use std::time::Duration;

use thiserror::Error;

use crate::storage::BlockId;

/// The main error type for ArcStore
#[derive(Error, Debug)]
pub enum Error {
    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Page Errors ==========
    #[error("Page error: access of {len} bytes at offset {offset} exceeds block size {block_size}")]
    PageOverflow {
        offset: usize,
        len: usize,
        block_size: usize,
    },

    #[error("Page error: invalid string encoding at offset {0}")]
    InvalidString(usize),

    // ========== Buffer Errors ==========
    #[error("Buffer error: no buffer became available within {0:?}")]
    BufferPoolExhausted(Duration),

    #[error("Buffer error: {0} is not pinned by transaction {1}")]
    BlockNotPinned(BlockId, u64),

    // ========== Log Errors ==========
    #[error("Log error: record of {len} bytes does not fit in a {block_size}-byte log block")]
    LogRecordTooLarge { len: usize, block_size: usize },

    #[error("Log error: corrupt log record: {0}")]
    CorruptLogRecord(String),

    // ========== Transaction Errors ==========
    #[error("Transaction error: lock on {0} not granted within {1:?}")]
    LockTimeout(BlockId, Duration),

    #[error("Transaction error: startup recovery has not completed")]
    RecoveryPending,

    // ========== Configuration Errors ==========
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true for resource-exhaustion failures.
    ///
    /// The failing transaction should be rolled back by its caller and may be
    /// retried later. Every other error is structural and retrying will not help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::BufferPoolExhausted(_) | Error::LockTimeout(..))
    }
}

/// Result type alias for ArcStore operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::LockTimeout(BlockId::new("users.tbl", 3), Duration::from_secs(2));
        assert_eq!(
            err.to_string(),
            "Transaction error: lock on [file users.tbl, block 3] not granted within 2s"
        );

        let err = Error::PageOverflow {
            offset: 396,
            len: 8,
            block_size: 400,
        };
        assert_eq!(
            err.to_string(),
            "Page error: access of 8 bytes at offset 396 exceeds block size 400"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::BufferPoolExhausted(Duration::from_millis(10)).is_retryable());
        assert!(Error::LockTimeout(BlockId::new("f", 0), Duration::from_millis(10)).is_retryable());
        assert!(!Error::CorruptLogRecord("bad op".into()).is_retryable());
        assert!(!Error::RecoveryPending.is_retryable());
    }
}
