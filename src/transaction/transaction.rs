//! Transaction
//!
//! The only object upper layers use to touch blocks. Reads take a shared
//! lock and writes an exclusive lock on the block; every write logs the
//! before image ahead of changing the page. `commit` and `rollback` consume
//! the transaction, and both end in the same teardown that releases its
//! locks and pins. Dropping an active transaction rolls it back.

use std::sync::Arc;

use tracing::{info, warn};

use super::buffer_list::BufferList;
use super::concurrency::ConcurrencyManager;
use super::lock_table::LockTable;
use super::recovery::RecoveryManager;
use super::TxId;
use crate::error::{Error, Result};
use crate::storage::{BlockId, BufferHandle, BufferPoolManager, DiskManager, LogManager, Page};

/// Transaction State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// Transaction Context
#[derive(Debug)]
pub struct Transaction {
    id: TxId,
    state: TransactionState,
    concurrency: ConcurrencyManager,
    recovery: RecoveryManager,
    buffers: BufferList,
    disk: Arc<DiskManager>,
    pool: Arc<BufferPoolManager>,
}

impl Transaction {
    /// Start a transaction and write its START record
    pub(crate) fn begin(
        id: TxId,
        disk: Arc<DiskManager>,
        log: Arc<LogManager>,
        pool: Arc<BufferPoolManager>,
        lock_table: Arc<LockTable>,
    ) -> Result<Self> {
        let recovery = RecoveryManager::new(id, log, pool.clone());
        recovery.log_start()?;
        info!(tx = id, "transaction started");

        Ok(Self {
            id,
            state: TransactionState::Active,
            concurrency: ConcurrencyManager::new(id, lock_table),
            recovery,
            buffers: BufferList::new(id, pool.clone()),
            disk,
            pool,
        })
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Commit: flush this transaction's pages, then make COMMIT durable
    pub fn commit(mut self) -> Result<()> {
        self.recovery.log_commit()?;
        self.finish(TransactionState::Committed);
        info!(tx = self.id, "transaction committed");
        Ok(())
    }

    /// Undo every change this transaction made
    pub fn rollback(mut self) -> Result<()> {
        self.rollback_in_place()
    }

    /// Undo unfinished work left in the log by earlier runs
    pub(crate) fn recover(&mut self) -> Result<()> {
        let recovery = self.recovery.clone();
        recovery.recover(self)
    }

    pub fn pin(&mut self, block: &BlockId) -> Result<()> {
        self.buffers.pin(block)?;
        Ok(())
    }

    pub fn unpin(&mut self, block: &BlockId) -> Result<()> {
        self.buffers.unpin(block)
    }

    pub fn get_int(&mut self, block: &BlockId, offset: usize) -> Result<i32> {
        self.concurrency.request_shared(block)?;
        let buffer = self.buffer_for(block)?;
        let value = buffer.lock().contents().get_int(offset)?;
        Ok(value)
    }

    pub fn get_string(&mut self, block: &BlockId, offset: usize) -> Result<String> {
        self.concurrency.request_shared(block)?;
        let buffer = self.buffer_for(block)?;
        let value = buffer.lock().contents().get_string(offset)?;
        Ok(value)
    }

    pub fn set_int(&mut self, block: &BlockId, offset: usize, value: i32) -> Result<()> {
        self.concurrency.request_exclusive(block)?;
        let handle = self.buffer_for(block)?;
        let mut buffer = handle.lock();
        let old_value = buffer.contents().get_int(offset)?;
        let lsn = self.recovery.log_set_int(block, offset, old_value)?;
        buffer.contents_mut().set_int(offset, value)?;
        buffer.set_modified(self.id, Some(lsn));
        Ok(())
    }

    /// Fails with [`Error::PageOverflow`] if the encoded string does not fit
    /// in the block; nothing is logged or written in that case.
    pub fn set_string(&mut self, block: &BlockId, offset: usize, value: &str) -> Result<()> {
        self.concurrency.request_exclusive(block)?;
        let handle = self.buffer_for(block)?;
        let mut buffer = handle.lock();
        let block_size = buffer.contents().block_size();
        let len = Page::encoded_len(value);
        if offset.checked_add(len).map_or(true, |end| end > block_size) {
            return Err(Error::PageOverflow {
                offset,
                len,
                block_size,
            });
        }
        // The covered bytes may hold anything, so the before image is raw
        let old_bytes = buffer.contents().read_range(offset, len)?.to_vec();
        let lsn = self.recovery.log_set_string(block, offset, &old_bytes)?;
        buffer.contents_mut().set_string(offset, value)?;
        buffer.set_modified(self.id, Some(lsn));
        Ok(())
    }

    /// Append a zero-filled block to `file_name`
    pub fn append(&mut self, file_name: &str) -> Result<BlockId> {
        self.concurrency
            .request_exclusive(&BlockId::end_of_file(file_name))?;
        self.disk.append(file_name)
    }

    /// Number of blocks in `file_name`
    pub fn size(&mut self, file_name: &str) -> Result<u64> {
        self.concurrency
            .request_shared(&BlockId::end_of_file(file_name))?;
        self.disk.size(file_name)
    }

    /// Bytes per block
    pub fn block_size(&self) -> usize {
        self.disk.block_size()
    }

    /// Unpinned buffers left in the shared pool
    pub fn available_buffers(&self) -> usize {
        self.pool.available()
    }

    pub(crate) fn set_int_unlogged(&mut self, block: &BlockId, offset: usize, value: i32) -> Result<()> {
        self.concurrency.request_exclusive(block)?;
        let handle = self.buffer_for(block)?;
        let mut buffer = handle.lock();
        buffer.contents_mut().set_int(offset, value)?;
        buffer.set_modified(self.id, None);
        Ok(())
    }

    /// Put back a raw before image without logging it
    pub(crate) fn restore_unlogged(
        &mut self,
        block: &BlockId,
        offset: usize,
        bytes: &[u8],
    ) -> Result<()> {
        self.concurrency.request_exclusive(block)?;
        let handle = self.buffer_for(block)?;
        let mut buffer = handle.lock();
        buffer.contents_mut().write_range(offset, bytes)?;
        buffer.set_modified(self.id, None);
        Ok(())
    }

    /// The buffer holding `block`, pinning it for the rest of the
    /// transaction if it is not pinned yet
    fn buffer_for(&mut self, block: &BlockId) -> Result<BufferHandle> {
        if let Some(handle) = self.buffers.get_buffer(block) {
            return Ok(handle.clone());
        }
        Ok(self.buffers.pin(block)?.clone())
    }

    fn rollback_in_place(&mut self) -> Result<()> {
        let recovery = self.recovery.clone();
        let result = recovery.rollback(self);
        self.finish(TransactionState::RolledBack);
        match &result {
            Ok(()) => info!(tx = self.id, "transaction rolled back"),
            Err(e) => warn!(tx = self.id, error = %e, "rollback failed"),
        }
        result
    }

    /// Release every lock and pin. Runs once per transaction.
    fn finish(&mut self, state: TransactionState) {
        if self.state != TransactionState::Active {
            return;
        }
        self.concurrency.release_all();
        self.buffers.unpin_all();
        self.state = state;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            warn!(tx = self.id, "transaction dropped while active; rolling back");
            // Errors are already logged by rollback_in_place
            let _ = self.rollback_in_place();
        }
    }
}
