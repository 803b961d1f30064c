//! Transaction module
//!
//! This module contains the transaction components:
//! - Lock table and per-transaction concurrency manager
//! - Log records and the recovery manager
//! - The transaction itself

pub mod buffer_list;
pub mod concurrency;
pub mod lock_table;
pub mod log_record;
pub mod recovery;
#[allow(clippy::module_inception)]
pub mod transaction;

/// Transaction identifier
pub type TxId = u64;

pub use buffer_list::BufferList;
pub use concurrency::ConcurrencyManager;
pub use lock_table::{LockMode, LockState, LockTable};
pub use log_record::LogRecord;
pub use recovery::RecoveryManager;
pub use transaction::{Transaction, TransactionState};
