//! Recovery Manager
//!
//! Writes a transaction's log records and implements rollback and startup
//! recovery. Both walk the log newest-first and restore before images
//! (undo-only). A page never reaches disk before the log record describing
//! its change, so no redo pass is needed.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::log_record::LogRecord;
use super::{Transaction, TxId};
use crate::error::Result;
use crate::storage::{BlockId, BufferPoolManager, LogManager, Lsn};

/// Recovery Manager
#[derive(Debug, Clone)]
pub struct RecoveryManager {
    tx: TxId,
    log: Arc<LogManager>,
    pool: Arc<BufferPoolManager>,
}

impl RecoveryManager {
    pub fn new(tx: TxId, log: Arc<LogManager>, pool: Arc<BufferPoolManager>) -> Self {
        Self { tx, log, pool }
    }

    pub fn log_start(&self) -> Result<Lsn> {
        self.append(&LogRecord::Start { tx: self.tx })
    }

    pub fn log_set_int(&self, block: &BlockId, offset: usize, old_value: i32) -> Result<Lsn> {
        self.append(&LogRecord::SetInt {
            tx: self.tx,
            block: block.clone(),
            offset,
            old_value,
        })
    }

    /// Log the bytes a string write is about to cover
    pub fn log_set_string(&self, block: &BlockId, offset: usize, old_bytes: &[u8]) -> Result<Lsn> {
        self.append(&LogRecord::SetString {
            tx: self.tx,
            block: block.clone(),
            offset,
            old_bytes: old_bytes.to_vec(),
        })
    }

    /// Force the transaction's pages out, then write and flush COMMIT
    pub fn log_commit(&self) -> Result<()> {
        self.pool.flush_all(self.tx)?;
        let lsn = self.append(&LogRecord::Commit { tx: self.tx })?;
        self.log.flush(lsn)
    }

    pub fn log_rollback(&self) -> Result<()> {
        let lsn = self.append(&LogRecord::Rollback { tx: self.tx })?;
        self.log.flush(lsn)
    }

    /// Undo every change made by `tx`, newest first, then log ROLLBACK
    pub fn rollback(&self, tx: &mut Transaction) -> Result<()> {
        let mut undone = 0usize;
        let mut found_start = false;
        for item in self.log.iterator()? {
            let (lsn, bytes) = item?;
            let record = LogRecord::from_bytes(&bytes)?;
            if record.tx_id() != Some(self.tx) {
                continue;
            }
            if let LogRecord::Start { .. } = record {
                found_start = true;
                break;
            }
            debug!(tx = self.tx, lsn, %record, "undoing");
            record.undo(tx)?;
            undone += 1;
        }
        if !found_start {
            warn!(tx = self.tx, "reached the start of the log without a START record");
        }

        self.pool.flush_all(self.tx)?;
        self.log_rollback()?;
        info!(tx = self.tx, undone, "rolled back");
        Ok(())
    }

    /// Undo every change of transactions that never finished.
    ///
    /// Scans back to the most recent checkpoint (or the start of the log),
    /// then flushes the restored pages and writes a new checkpoint.
    pub fn recover(&self, tx: &mut Transaction) -> Result<()> {
        let mut finished: HashSet<TxId> = HashSet::new();
        let mut unfinished: HashSet<TxId> = HashSet::new();
        let mut undone = 0usize;

        for item in self.log.iterator()? {
            let (lsn, bytes) = item?;
            let record = LogRecord::from_bytes(&bytes)?;
            match &record {
                LogRecord::Checkpoint => {
                    debug!(lsn, "reached checkpoint");
                    break;
                }
                LogRecord::Commit { tx: id } | LogRecord::Rollback { tx: id } => {
                    finished.insert(*id);
                }
                LogRecord::Start { tx: id } => {
                    if *id != self.tx && !finished.contains(id) {
                        unfinished.insert(*id);
                    }
                }
                LogRecord::SetInt { tx: id, .. } | LogRecord::SetString { tx: id, .. } => {
                    if *id == self.tx || finished.contains(id) {
                        continue;
                    }
                    unfinished.insert(*id);
                    debug!(tx = *id, lsn, %record, "undoing unfinished change");
                    record.undo(tx)?;
                    undone += 1;
                }
            }
        }

        self.pool.flush_all(self.tx)?;
        let lsn = self.append(&LogRecord::Checkpoint)?;
        self.log.flush(lsn)?;
        info!(
            undone,
            unfinished_transactions = unfinished.len(),
            "recovery complete"
        );
        Ok(())
    }

    fn append(&self, record: &LogRecord) -> Result<Lsn> {
        self.log.append(&record.to_bytes())
    }
}
