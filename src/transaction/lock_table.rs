//! Lock Table
//!
//! Block-granularity shared/exclusive locks shared by every transaction of a
//! database. A blocked request waits on the condition variable of its block
//! and gives up with [`Error::LockTimeout`] once the configured wait elapses.
//! There is no waits-for graph: a deadlock shows up as one of its participants
//! timing out.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::TxId;
use crate::error::{Error, Result};
use crate::storage::BlockId;

/// Lock Mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Externally visible lock status of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Shared(usize),
    Exclusive,
}

#[derive(Debug, Default)]
struct LockEntry {
    exclusive: Option<TxId>,
    shared: HashSet<TxId>,
    waiters: usize,
    cvar: Arc<Condvar>,
}

impl LockEntry {
    fn can_grant(&self, tx: TxId, mode: LockMode) -> bool {
        let exclusive_ok = self.exclusive.map_or(true, |holder| holder == tx);
        match mode {
            LockMode::Shared => exclusive_ok,
            LockMode::Exclusive => exclusive_ok && self.shared.iter().all(|&holder| holder == tx),
        }
    }

    fn grant(&mut self, tx: TxId, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                // An exclusive holder already has read access
                if self.exclusive != Some(tx) {
                    self.shared.insert(tx);
                }
            }
            LockMode::Exclusive => {
                self.shared.remove(&tx);
                self.exclusive = Some(tx);
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty() && self.waiters == 0
    }
}

type LockMap = HashMap<BlockId, LockEntry>;

/// Lock Table
#[derive(Debug)]
pub struct LockTable {
    entries: Mutex<LockMap>,
    max_wait: Duration,
}

impl LockTable {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_wait,
        }
    }

    pub fn acquire_shared(&self, tx: TxId, block: &BlockId) -> Result<()> {
        self.acquire(tx, block, LockMode::Shared)
    }

    /// Acquire an exclusive lock, upgrading a shared lock `tx` already holds
    pub fn acquire_exclusive(&self, tx: TxId, block: &BlockId) -> Result<()> {
        self.acquire(tx, block, LockMode::Exclusive)
    }

    /// Release whatever lock `tx` holds on `block` and wake its waiters
    pub fn release(&self, tx: TxId, block: &BlockId) {
        let mut entries = self.entries.lock();
        let Entry::Occupied(mut slot) = entries.entry(block.clone()) else {
            return;
        };
        let entry = slot.get_mut();
        let mut changed = entry.shared.remove(&tx);
        if entry.exclusive == Some(tx) {
            entry.exclusive = None;
            changed = true;
        }
        if changed {
            entry.cvar.notify_all();
        }
        if entry.is_idle() {
            slot.remove();
        }
    }

    pub fn lock_state(&self, block: &BlockId) -> LockState {
        match self.entries.lock().get(block) {
            Some(entry) if entry.exclusive.is_some() => LockState::Exclusive,
            Some(entry) if !entry.shared.is_empty() => LockState::Shared(entry.shared.len()),
            _ => LockState::Unlocked,
        }
    }

    fn acquire(&self, tx: TxId, block: &BlockId, mode: LockMode) -> Result<()> {
        let deadline = Instant::now() + self.max_wait;
        let mut entries = self.entries.lock();
        loop {
            let entry = entries.entry(block.clone()).or_default();
            if entry.can_grant(tx, mode) {
                entry.grant(tx, mode);
                return Ok(());
            }

            if Instant::now() >= deadline {
                if entry.is_idle() {
                    entries.remove(block);
                }
                warn!(tx, %block, ?mode, timeout = ?self.max_wait, "lock wait timed out");
                return Err(Error::LockTimeout(block.clone(), self.max_wait));
            }

            debug!(tx, %block, ?mode, "waiting for lock");
            Self::wait(&mut entries, block, deadline);
        }
    }

    fn wait(entries: &mut MutexGuard<'_, LockMap>, block: &BlockId, deadline: Instant) {
        let cvar = match entries.get_mut(block) {
            Some(entry) => {
                entry.waiters += 1;
                entry.cvar.clone()
            }
            None => return,
        };
        cvar.wait_until(entries, deadline);
        // Entries with waiters are never removed
        if let Some(entry) = entries.get_mut(block) {
            entry.waiters -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn block(n: u64) -> BlockId {
        BlockId::new("t.tbl", n)
    }

    #[test]
    fn test_shared_locks_stack() {
        let table = LockTable::new(Duration::from_millis(100));
        table.acquire_shared(1, &block(0)).unwrap();
        table.acquire_shared(2, &block(0)).unwrap();
        assert_eq!(table.lock_state(&block(0)), LockState::Shared(2));

        table.release(1, &block(0));
        assert_eq!(table.lock_state(&block(0)), LockState::Shared(1));
        table.release(2, &block(0));
        assert_eq!(table.lock_state(&block(0)), LockState::Unlocked);
    }

    #[test]
    fn test_exclusive_conflicts_time_out() {
        let table = LockTable::new(Duration::from_millis(100));
        table.acquire_exclusive(1, &block(0)).unwrap();

        let err = table.acquire_shared(2, &block(0)).unwrap_err();
        assert!(matches!(err, Error::LockTimeout(..)));
        let err = table.acquire_exclusive(2, &block(0)).unwrap_err();
        assert!(err.is_retryable());

        // Other blocks are unaffected
        table.acquire_exclusive(2, &block(1)).unwrap();
        assert_eq!(table.lock_state(&block(0)), LockState::Exclusive);
    }

    #[test]
    fn test_upgrade_by_sole_holder() {
        let table = LockTable::new(Duration::from_millis(100));
        table.acquire_shared(1, &block(0)).unwrap();
        table.acquire_exclusive(1, &block(0)).unwrap();
        assert_eq!(table.lock_state(&block(0)), LockState::Exclusive);

        // Re-requesting shared while exclusive is a no-op
        table.acquire_shared(1, &block(0)).unwrap();
        table.release(1, &block(0));
        assert_eq!(table.lock_state(&block(0)), LockState::Unlocked);
    }

    #[test]
    fn test_upgrade_blocked_by_other_reader() {
        let table = LockTable::new(Duration::from_millis(100));
        table.acquire_shared(1, &block(0)).unwrap();
        table.acquire_shared(2, &block(0)).unwrap();

        let err = table.acquire_exclusive(1, &block(0)).unwrap_err();
        assert!(matches!(err, Error::LockTimeout(..)));
        assert_eq!(table.lock_state(&block(0)), LockState::Shared(2));
    }

    #[test]
    fn test_waiter_is_woken_by_release() {
        let table = Arc::new(LockTable::new(Duration::from_secs(5)));
        table.acquire_exclusive(1, &block(0)).unwrap();

        let waiter = {
            let table = table.clone();
            thread::spawn(move || {
                let start = Instant::now();
                table.acquire_exclusive(2, &block(0)).map(|_| start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        table.release(1, &block(0));

        let waited = waiter.join().unwrap().unwrap();
        assert!(waited < Duration::from_secs(5));
        assert_eq!(table.lock_state(&block(0)), LockState::Exclusive);
    }
}
