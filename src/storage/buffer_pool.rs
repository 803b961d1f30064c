//! Buffer pool manager for ArcStore
//!
//! This module implements a fixed-size buffer pool for caching blocks from disk.
//! Unpinned buffers are recycled least-recently-unpinned first. A pinned
//! buffer is never chosen as a victim.
//!
//! The pool state lock only covers bookkeeping: the page table, pin counts
//! and the replacer. Evicting and loading a frame happen under that frame's
//! own lock once the state lock is released, so other pins and unpins never
//! wait on disk I/O. A block whose old frame is still being written back is
//! not reloaded until the write finishes.
//!
//! Lock order: pool state, then an individual buffer, then the log manager,
//! then the disk manager. Code holding a buffer lock must never take the pool
//! state lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::block::BlockId;
use super::disk::DiskManager;
use super::page::Page;
use super::wal::{LogManager, Lsn};
use crate::error::{Error, Result};
use crate::transaction::TxId;

/// One frame of the pool
#[derive(Debug)]
pub struct Buffer {
    page: Page,
    block: Option<BlockId>,
    /// Transaction that last modified the page; `Some` means dirty
    modifying_tx: Option<TxId>,
    /// LSN of the log record covering the latest modification
    lsn: Option<Lsn>,
}

impl Buffer {
    fn new(block_size: usize) -> Self {
        Self {
            page: Page::new(block_size),
            block: None,
            modifying_tx: None,
            lsn: None,
        }
    }

    pub fn contents(&self) -> &Page {
        &self.page
    }

    pub fn contents_mut(&mut self) -> &mut Page {
        &mut self.page
    }

    pub fn block(&self) -> Option<&BlockId> {
        self.block.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.modifying_tx.is_some()
    }

    pub fn modifying_tx(&self) -> Option<TxId> {
        self.modifying_tx
    }

    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn
    }

    /// Record a modification by `tx`.
    ///
    /// `lsn` is `None` for unlogged changes (undo), which keep the previous LSN.
    pub fn set_modified(&mut self, tx: TxId, lsn: Option<Lsn>) {
        self.modifying_tx = Some(tx);
        if lsn.is_some() {
            self.lsn = lsn;
        }
    }

    /// Write the page back if dirty, forcing its log record out first
    fn flush(&mut self, disk: &DiskManager, log: &LogManager) -> Result<()> {
        if self.modifying_tx.is_none() {
            return Ok(());
        }
        if let Some(lsn) = self.lsn {
            log.flush(lsn)?;
        }
        if let Some(block) = &self.block {
            disk.write(block, &self.page)?;
        }
        self.modifying_tx = None;
        Ok(())
    }

    fn assign_to_block(
        &mut self,
        block: BlockId,
        disk: &DiskManager,
        log: &LogManager,
    ) -> Result<()> {
        self.flush(disk, log)?;
        self.block = None;
        self.lsn = None;
        disk.read(&block, &mut self.page)?;
        self.block = Some(block);
        Ok(())
    }
}

/// A pinned buffer, returned by [`BufferPoolManager::pin`]
#[derive(Debug, Clone)]
pub struct BufferHandle {
    index: usize,
    buffer: Arc<Mutex<Buffer>>,
}

impl BufferHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock()
    }
}

#[derive(Debug)]
struct PoolState {
    /// Page table: BlockId -> frame index
    page_table: HashMap<BlockId, usize>,
    /// Pin count per frame
    pins: Vec<u32>,
    /// Unpinned frames, least recently unpinned first
    replacer: VecDeque<usize>,
    /// Blocks whose frame is being written back to make room for another
    evicting: HashSet<BlockId>,
    num_available: usize,
}

impl PoolState {
    fn pin_frame(&mut self, index: usize) {
        if self.pins[index] == 0 {
            self.num_available -= 1;
            if let Some(pos) = self.replacer.iter().position(|&x| x == index) {
                self.replacer.remove(pos);
            }
        }
        self.pins[index] += 1;
    }

    /// Drop one pin; returns true if the frame became unpinned
    fn unpin_frame(&mut self, index: usize) -> bool {
        self.pins[index] -= 1;
        if self.pins[index] == 0 {
            self.num_available += 1;
            self.replacer.push_back(index);
            return true;
        }
        false
    }
}

/// What `pin` got hold of while holding the state lock
enum Reservation {
    /// The block already has a frame
    Resident(usize),
    /// A victim frame now mapped to the block, still to be loaded
    Load(usize),
}

/// Buffer pool manager
#[derive(Debug)]
pub struct BufferPoolManager {
    frames: Vec<Arc<Mutex<Buffer>>>,
    state: Mutex<PoolState>,
    /// Signalled whenever a frame becomes unpinned or an eviction finishes
    available: Condvar,
    max_wait: Duration,
    disk: Arc<DiskManager>,
    log: Arc<LogManager>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        max_wait: Duration,
        disk: Arc<DiskManager>,
        log: Arc<LogManager>,
    ) -> Self {
        let frames = (0..pool_size)
            .map(|_| Arc::new(Mutex::new(Buffer::new(disk.block_size()))))
            .collect();

        Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                pins: vec![0; pool_size],
                replacer: (0..pool_size).collect(),
                evicting: HashSet::new(),
                num_available: pool_size,
            }),
            available: Condvar::new(),
            max_wait,
            disk,
            log,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Number of unpinned buffers
    pub fn available(&self) -> usize {
        self.state.lock().num_available
    }

    pub fn pin_count(&self, handle: &BufferHandle) -> u32 {
        self.state.lock().pins[handle.index]
    }

    /// Pin a buffer holding `block`, loading it if necessary.
    ///
    /// Waits up to the configured timeout for a buffer to be unpinned when
    /// every buffer is in use.
    pub fn pin(&self, block: &BlockId) -> Result<BufferHandle> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            let mut state = self.state.lock();
            let reservation = loop {
                if let Some(reservation) = self.reserve(&mut state, block) {
                    break reservation;
                }
                debug!(%block, "waiting for an unpinned buffer");
                if self.available.wait_until(&mut state, deadline).timed_out() {
                    if let Some(reservation) = self.reserve(&mut state, block) {
                        break reservation;
                    }
                    warn!(%block, timeout = ?self.max_wait, "buffer pool exhausted");
                    return Err(Error::BufferPoolExhausted(self.max_wait));
                }
            };

            match reservation {
                Reservation::Resident(index) => {
                    drop(state);
                    // Blocks until a load still running on this frame is done
                    let loaded = self.frames[index].lock().block() == Some(block);
                    if loaded {
                        return Ok(self.handle(index));
                    }
                    // The load failed; start over
                    self.release(index);
                }
                Reservation::Load(index) => {
                    let mut buffer = self.frames[index].lock();
                    let evicted = buffer.block.clone();
                    if let Some(old) = &evicted {
                        if state.page_table.get(old) == Some(&index) {
                            state.page_table.remove(old);
                        }
                        state.evicting.insert(old.clone());
                    }
                    state.page_table.insert(block.clone(), index);
                    drop(state);

                    let result = buffer.assign_to_block(block.clone(), &self.disk, &self.log);
                    let still_mapped = buffer.block.clone();
                    drop(buffer);
                    return self.finish_load(index, block, evicted, still_mapped, result);
                }
            }
        }
    }

    pub fn unpin(&self, handle: &BufferHandle) {
        self.release(handle.index);
    }

    /// Write out every buffer last modified by `tx`
    pub fn flush_all(&self, tx: TxId) -> Result<()> {
        for frame in &self.frames {
            let mut buffer = frame.lock();
            if buffer.modifying_tx == Some(tx) {
                buffer.flush(&self.disk, &self.log)?;
            }
        }
        Ok(())
    }

    fn handle(&self, index: usize) -> BufferHandle {
        BufferHandle {
            index,
            buffer: self.frames[index].clone(),
        }
    }

    fn release(&self, index: usize) {
        let mut state = self.state.lock();
        if state.pins[index] == 0 {
            warn!(frame = index, "unpin of a buffer that is not pinned");
            return;
        }
        if state.unpin_frame(index) {
            self.available.notify_all();
        }
    }

    /// Pin the frame holding `block`, or claim the least recently unpinned
    /// frame for it. `None` means the caller has to wait.
    fn reserve(&self, state: &mut PoolState, block: &BlockId) -> Option<Reservation> {
        if let Some(&index) = state.page_table.get(block) {
            state.pin_frame(index);
            return Some(Reservation::Resident(index));
        }
        if state.evicting.contains(block) {
            return None;
        }
        let index = *state.replacer.front()?;
        state.pin_frame(index);
        Some(Reservation::Load(index))
    }

    /// Publish the outcome of loading `block` into frame `index`
    fn finish_load(
        &self,
        index: usize,
        block: &BlockId,
        evicted: Option<BlockId>,
        mapped: Option<BlockId>,
        result: Result<()>,
    ) -> Result<BufferHandle> {
        let mut state = self.state.lock();
        if let Some(old) = &evicted {
            state.evicting.remove(old);
        }
        match result {
            Ok(()) => {
                if let Some(old) = evicted {
                    debug!(evicted = %old, loaded = %block, frame = index, "replaced buffer");
                }
                self.available.notify_all();
                Ok(self.handle(index))
            }
            Err(e) => {
                if state.page_table.get(block) == Some(&index) {
                    state.page_table.remove(block);
                }
                // A failed write-back leaves the old page in the frame
                if let Some(old) = mapped {
                    state.page_table.insert(old, index);
                }
                state.pins[index] -= 1;
                if state.pins[index] == 0 {
                    state.num_available += 1;
                    state.replacer.push_front(index);
                }
                self.available.notify_all();
                Err(e)
            }
        }
    }
}
