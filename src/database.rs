//! Database context
//!
//! Owns the components every transaction shares: disk manager, log manager,
//! buffer pool and lock table. One `Database` is opened per data directory,
//! recovered once, and then hands out transactions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::storage::{BufferPoolManager, DiskManager, LogManager};
use crate::transaction::{LockTable, Transaction, TxId};

/// Shared storage context
#[derive(Debug)]
pub struct Database {
    config: StorageConfig,
    disk: Arc<DiskManager>,
    log: Arc<LogManager>,
    pool: Arc<BufferPoolManager>,
    lock_table: Arc<LockTable>,
    next_tx_id: AtomicU64,
    /// Held for the whole recovery pass so it runs exactly once
    recovered: Mutex<bool>,
}

impl Database {
    /// Open the data directory. Call [`recover_on_startup`](Self::recover_on_startup)
    /// before beginning any transaction.
    pub fn open(config: StorageConfig) -> Result<Self> {
        config.validate()?;

        let disk = Arc::new(DiskManager::open(&config.data_dir, config.block_size)?);
        let log = Arc::new(LogManager::open(disk.clone(), config.log_file.as_str())?);
        let pool = Arc::new(BufferPoolManager::new(
            config.buffer_pool_size,
            config.buffer_wait(),
            disk.clone(),
            log.clone(),
        ));
        let lock_table = Arc::new(LockTable::new(config.lock_wait()));

        info!(
            dir = %config.data_dir.display(),
            block_size = config.block_size,
            buffers = config.buffer_pool_size,
            new = disk.is_new(),
            "opened database"
        );

        Ok(Self {
            config,
            disk,
            log,
            pool,
            lock_table,
            next_tx_id: AtomicU64::new(1),
            recovered: Mutex::new(false),
        })
    }

    /// Open and immediately run startup recovery
    pub fn open_and_recover(config: StorageConfig) -> Result<Self> {
        let db = Self::open(config)?;
        db.recover_on_startup()?;
        Ok(db)
    }

    /// Undo whatever unfinished transactions left behind and write a
    /// checkpoint. Runs once; later calls do nothing.
    pub fn recover_on_startup(&self) -> Result<()> {
        let mut recovered = self.recovered.lock();
        if *recovered {
            return Ok(());
        }
        if self.disk.is_new() {
            info!("creating new database");
        } else {
            info!("recovering existing database");
        }

        let mut tx = self.new_transaction()?;
        tx.recover()?;
        tx.commit()?;
        *recovered = true;
        Ok(())
    }

    /// Begin a new transaction
    pub fn begin(&self) -> Result<Transaction> {
        if !*self.recovered.lock() {
            return Err(Error::RecoveryPending);
        }
        self.new_transaction()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn is_new(&self) -> bool {
        self.disk.is_new()
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.pool
    }

    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.lock_table
    }

    fn new_transaction(&self) -> Result<Transaction> {
        let id: TxId = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        Transaction::begin(
            id,
            self.disk.clone(),
            self.log.clone(),
            self.pool.clone(),
            self.lock_table.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::LogRecord;
    use tempfile::tempdir;

    #[test]
    fn test_begin_requires_recovery() {
        let dir = tempdir().unwrap();
        let db = Database::open(StorageConfig::new(dir.path().join("db"))).unwrap();
        assert!(db.is_new());
        assert!(matches!(db.begin(), Err(Error::RecoveryPending)));

        db.recover_on_startup().unwrap();
        let first = db.begin().unwrap();
        let second = db.begin().unwrap();
        assert!(second.id() > first.id());
    }

    #[test]
    fn test_concurrent_recovery_runs_once() {
        let dir = tempdir().unwrap();
        let db = std::sync::Arc::new(Database::open(StorageConfig::new(dir.path())).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.recover_on_startup())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let records: Vec<LogRecord> = db
            .log()
            .iterator()
            .unwrap()
            .map(|item| LogRecord::from_bytes(&item.unwrap().1).unwrap())
            .collect();
        let checkpoints = records
            .iter()
            .filter(|record| **record == LogRecord::Checkpoint)
            .count();
        assert_eq!(checkpoints, 1);
        // START, CHECKPOINT and COMMIT of the single recovery transaction
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path()).buffer_pool_size(0);
        assert!(matches!(Database::open(config), Err(Error::Config(_))));
    }
}
