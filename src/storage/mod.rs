//! Storage engine module
//!
//! This module contains the storage engine components:
//! - Block identifiers and pages
//! - Disk manager
//! - Write-ahead log
//! - Buffer pool

pub mod block;
pub mod buffer_pool;
pub mod disk;
pub mod page;
pub mod wal;

pub use block::{BlockId, END_OF_FILE};
pub use buffer_pool::{Buffer, BufferHandle, BufferPoolManager};
pub use disk::{DiskManager, IoStats};
pub use page::{Page, DEFAULT_BLOCK_SIZE};
pub use wal::{LogIterator, LogManager, Lsn};
