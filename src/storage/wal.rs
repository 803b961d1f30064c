//! Write-Ahead Log (WAL) Manager
//!
//! The log is a file of ordinary blocks. Records are opaque byte strings;
//! their meaning belongs to the recovery manager.
//!
//! Block layout:
//!
//! ```text
//! +----------+-------------+-----------------+-----+----------------+
//! | boundary | free space  | newest frame    | ... | oldest frame   |
//! +----------+-------------+-----------------+-----+----------------+
//! 0          4             boundary                        block_size
//! ```
//!
//! Frames are packed from the end of the block towards the front and
//! `boundary` holds the offset of the most recent one, so scanning a block
//! forward from `boundary` yields its records newest first. A frame is a
//! length-prefixed payload of `[lsn: u64][record bytes]`. LSNs are stored in
//! the frames so the sequence carries on across restarts.

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::block::BlockId;
use super::disk::DiskManager;
use super::page::{Page, INT_SIZE};
use crate::error::{Error, Result};

/// Log Sequence Number
pub type Lsn = u64;

const LSN_SIZE: usize = 8;

/// Bytes of framing around each record
const FRAME_OVERHEAD: usize = INT_SIZE + LSN_SIZE;

#[derive(Debug)]
struct LogState {
    /// In-memory image of the block currently being filled
    page: Page,
    current_block: BlockId,
    latest_lsn: Lsn,
    last_saved_lsn: Lsn,
}

/// Manages Write-Ahead Logs
#[derive(Debug)]
pub struct LogManager {
    disk: Arc<DiskManager>,
    log_file: String,
    state: Mutex<LogState>,
}

impl LogManager {
    /// Open the log file, creating its first block if it is empty
    pub fn open(disk: Arc<DiskManager>, log_file: impl Into<String>) -> Result<Self> {
        let log_file = log_file.into();
        let block_size = disk.block_size();
        let size = disk.size(&log_file)?;

        let mut page = Page::new(block_size);
        let (current_block, latest_lsn) = if size == 0 {
            (Self::append_new_block(&disk, &log_file, &mut page)?, 0)
        } else {
            let block = BlockId::new(log_file.as_str(), size - 1);
            disk.read(&block, &mut page)?;
            if page.get_int(0)? == 0 {
                // Appended but never initialised before a crash
                warn!(block = %block, "initialising empty trailing log block");
                page.set_int(0, block_size as i32)?;
                disk.write(&block, &page)?;
            }
            read_boundary(&page)?;
            let latest = Self::find_latest_lsn(&disk, &block)?;
            (block, latest)
        };

        info!(
            file = %log_file,
            blocks = size.max(1),
            latest_lsn,
            "opened log"
        );

        Ok(Self {
            disk,
            log_file,
            state: Mutex::new(LogState {
                page,
                current_block,
                latest_lsn,
                last_saved_lsn: latest_lsn,
            }),
        })
    }

    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    /// Append a record and return its LSN.
    ///
    /// The record is staged in memory; it is durable only after a
    /// [`flush`](Self::flush) covering the returned LSN.
    pub fn append(&self, record: &[u8]) -> Result<Lsn> {
        let block_size = self.disk.block_size();
        let needed = FRAME_OVERHEAD + record.len();
        if needed + INT_SIZE > block_size {
            return Err(Error::LogRecordTooLarge {
                len: record.len(),
                block_size,
            });
        }

        let mut state = self.state.lock();
        let mut boundary = read_boundary(&state.page)?;
        if boundary < needed + INT_SIZE {
            self.flush_locked(&mut state)?;
            let LogState {
                page,
                current_block,
                ..
            } = &mut *state;
            *current_block = Self::append_new_block(&self.disk, &self.log_file, page)?;
            debug!(block = %current_block, "log rolled over to new block");
            boundary = block_size;
        }

        let lsn = state.latest_lsn + 1;
        let mut payload = BytesMut::with_capacity(LSN_SIZE + record.len());
        payload.put_u64(lsn);
        payload.put_slice(record);

        let pos = boundary - needed;
        state.page.set_bytes(pos, &payload)?;
        state.page.set_int(0, pos as i32)?;
        state.latest_lsn = lsn;
        Ok(lsn)
    }

    /// Ensure every record up to and including `lsn` is on disk
    pub fn flush(&self, lsn: Lsn) -> Result<()> {
        let mut state = self.state.lock();
        if lsn > state.last_saved_lsn {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }

    /// LSN of the most recently appended record (0 if the log is empty)
    pub fn latest_lsn(&self) -> Lsn {
        self.state.lock().latest_lsn
    }

    /// LSN up to which the log is known to be durable
    pub fn last_saved_lsn(&self) -> Lsn {
        self.state.lock().last_saved_lsn
    }

    /// Iterate over the log, most recent record first.
    ///
    /// Flushes first so the iterator sees every appended record.
    pub fn iterator(&self) -> Result<LogIterator> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)?;
        LogIterator::new(self.disk.clone(), state.current_block.clone())
    }

    fn flush_locked(&self, state: &mut LogState) -> Result<()> {
        self.disk.write(&state.current_block, &state.page)?;
        state.last_saved_lsn = state.latest_lsn;
        Ok(())
    }

    fn append_new_block(disk: &DiskManager, log_file: &str, page: &mut Page) -> Result<BlockId> {
        let block = disk.append(log_file)?;
        *page = Page::new(disk.block_size());
        page.set_int(0, disk.block_size() as i32)?;
        disk.write(&block, page)?;
        Ok(block)
    }

    /// Find the LSN of the newest record at or before `last_block`
    fn find_latest_lsn(disk: &Arc<DiskManager>, last_block: &BlockId) -> Result<Lsn> {
        match LogIterator::new(disk.clone(), last_block.clone())?.next() {
            Some(Ok((lsn, _))) => Ok(lsn),
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }
}

/// Reverse iterator over log records
#[derive(Debug)]
pub struct LogIterator {
    disk: Arc<DiskManager>,
    block: BlockId,
    page: Page,
    current_pos: usize,
    done: bool,
}

impl LogIterator {
    fn new(disk: Arc<DiskManager>, block: BlockId) -> Result<Self> {
        let page = Page::new(disk.block_size());
        let mut iter = Self {
            disk,
            block,
            page,
            current_pos: 0,
            done: false,
        };
        iter.move_to_block()?;
        Ok(iter)
    }

    fn move_to_block(&mut self) -> Result<()> {
        self.disk.read(&self.block, &mut self.page)?;
        self.current_pos = read_boundary(&self.page)?;
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<(Lsn, Vec<u8>)>> {
        while self.current_pos >= self.page.block_size() {
            if self.block.number() == 0 {
                return Ok(None);
            }
            self.block = BlockId::new(self.block.file_name(), self.block.number() - 1);
            self.move_to_block()?;
        }

        let frame = self.page.get_bytes(self.current_pos).map_err(|e| {
            Error::CorruptLogRecord(format!(
                "bad frame at offset {} of {}: {}",
                self.current_pos, self.block, e
            ))
        })?;
        if frame.len() < LSN_SIZE {
            return Err(Error::CorruptLogRecord(format!(
                "frame of {} bytes at offset {} of {} has no LSN",
                frame.len(),
                self.current_pos,
                self.block
            )));
        }
        self.current_pos += INT_SIZE + frame.len();

        let mut frame = frame;
        let lsn = frame.get_u64();
        Ok(Some((lsn, frame.to_vec())))
    }
}

impl Iterator for LogIterator {
    type Item = Result<(Lsn, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn read_boundary(page: &Page) -> Result<usize> {
    let boundary = page.get_int(0)?;
    if boundary < INT_SIZE as i32 || boundary as usize > page.block_size() {
        return Err(Error::CorruptLogRecord(format!(
            "log block boundary {} out of range",
            boundary
        )));
    }
    Ok(boundary as usize)
}
