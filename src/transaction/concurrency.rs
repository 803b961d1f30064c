//! Per-transaction view of the lock table
//!
//! Remembers which locks the owning transaction already holds so repeated
//! requests never reach the shared table, and releases them all in one go
//! when the transaction ends.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::lock_table::{LockMode, LockTable};
use super::TxId;
use crate::error::Result;
use crate::storage::BlockId;

/// Concurrency Manager
#[derive(Debug)]
pub struct ConcurrencyManager {
    tx: TxId,
    lock_table: Arc<LockTable>,
    locks: HashMap<BlockId, LockMode>,
}

impl ConcurrencyManager {
    pub fn new(tx: TxId, lock_table: Arc<LockTable>) -> Self {
        Self {
            tx,
            lock_table,
            locks: HashMap::new(),
        }
    }

    pub fn request_shared(&mut self, block: &BlockId) -> Result<()> {
        if self.locks.contains_key(block) {
            return Ok(());
        }
        self.lock_table.acquire_shared(self.tx, block)?;
        self.locks.insert(block.clone(), LockMode::Shared);
        Ok(())
    }

    pub fn request_exclusive(&mut self, block: &BlockId) -> Result<()> {
        if self.holds(block) == Some(LockMode::Exclusive) {
            return Ok(());
        }
        self.lock_table.acquire_exclusive(self.tx, block)?;
        self.locks.insert(block.clone(), LockMode::Exclusive);
        Ok(())
    }

    pub fn holds(&self, block: &BlockId) -> Option<LockMode> {
        self.locks.get(block).copied()
    }

    /// Release every lock held; called once when the transaction ends
    pub fn release_all(&mut self) {
        debug!(tx = self.tx, count = self.locks.len(), "releasing locks");
        for block in self.locks.keys() {
            self.lock_table.release(self.tx, block);
        }
        self.locks.clear();
    }
}
