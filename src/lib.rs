//! ArcStore - storage and transaction engine for ArcDB
//!
//! This library provides the durable core underneath the SQL layers:
//! - Block-addressed file storage and typed pages
//! - Write-ahead log with reverse iteration
//! - Buffer pool with pinning and WAL-ordered eviction
//! - Block-level shared/exclusive locking with timeouts
//! - Undo-only rollback and crash recovery
//! - Transactions tying all of the above together

pub mod config;
pub mod database;
pub mod error;
pub mod storage;
pub mod transaction;

pub use config::StorageConfig;
pub use database::Database;
pub use error::{Error, Result};
pub use storage::BlockId;
pub use transaction::{Transaction, TxId};
