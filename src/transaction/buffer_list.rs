//! Buffers pinned by one transaction

use std::collections::HashMap;
use std::sync::Arc;

use super::TxId;
use crate::error::{Error, Result};
use crate::storage::{BlockId, BufferHandle, BufferPoolManager};

/// Tracks a transaction's pins so they can all be dropped at once.
///
/// A block may be pinned several times; each pin is undone by one unpin.
#[derive(Debug)]
pub struct BufferList {
    tx: TxId,
    pool: Arc<BufferPoolManager>,
    buffers: HashMap<BlockId, BufferHandle>,
    pins: Vec<BlockId>,
}

impl BufferList {
    pub fn new(tx: TxId, pool: Arc<BufferPoolManager>) -> Self {
        Self {
            tx,
            pool,
            buffers: HashMap::new(),
            pins: Vec::new(),
        }
    }

    pub fn get_buffer(&self, block: &BlockId) -> Option<&BufferHandle> {
        self.buffers.get(block)
    }

    pub fn pin(&mut self, block: &BlockId) -> Result<&BufferHandle> {
        let handle = self.pool.pin(block)?;
        self.pins.push(block.clone());
        Ok(self.buffers.entry(block.clone()).or_insert(handle))
    }

    pub fn unpin(&mut self, block: &BlockId) -> Result<()> {
        let pos = self
            .pins
            .iter()
            .position(|b| b == block)
            .ok_or_else(|| Error::BlockNotPinned(block.clone(), self.tx))?;
        self.pins.remove(pos);

        if let Some(handle) = self.buffers.get(block) {
            self.pool.unpin(handle);
        }
        if !self.pins.contains(block) {
            self.buffers.remove(block);
        }
        Ok(())
    }

    pub fn unpin_all(&mut self) {
        for block in &self.pins {
            if let Some(handle) = self.buffers.get(block) {
                self.pool.unpin(handle);
            }
        }
        self.buffers.clear();
        self.pins.clear();
    }

    pub fn pinned_blocks(&self) -> impl Iterator<Item = &BlockId> {
        self.buffers.keys()
    }
}
