//! Disk manager for ArcStore
//!
//! This module handles block-addressed file I/O. Every file in the data
//! directory is a contiguous run of fixed-size blocks numbered from 0 and
//! grows only by appending. All physical I/O goes through one mutex so that
//! reads, writes and appends never interleave.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::block::BlockId;
use super::page::Page;
use crate::error::Result;

/// Prefix of scratch files that do not survive a restart
const TEMP_FILE_PREFIX: &str = "temp";

/// Block I/O counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    pub blocks_read: u64,
    pub blocks_written: u64,
}

/// Disk manager
#[derive(Debug)]
pub struct DiskManager {
    /// Directory where data files are stored
    data_dir: PathBuf,
    block_size: usize,
    /// True if the data directory did not exist before this open
    is_new: bool,
    /// File handles for open files, keyed by file name
    open_files: Mutex<HashMap<String, File>>,
    blocks_read: AtomicU64,
    blocks_written: AtomicU64,
}

impl DiskManager {
    /// Open (creating if needed) a data directory
    pub fn open(data_dir: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let is_new = !data_dir.exists();
        if is_new {
            fs::create_dir_all(&data_dir)?;
            info!(dir = %data_dir.display(), "created data directory");
        }

        for entry in fs::read_dir(&data_dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(TEMP_FILE_PREFIX) {
                debug!(file = ?entry.file_name(), "removing leftover temporary file");
                fs::remove_file(entry.path())?;
            }
        }

        Ok(Self {
            data_dir,
            block_size,
            is_new,
            open_files: Mutex::new(HashMap::new()),
            blocks_read: AtomicU64::new(0),
            blocks_written: AtomicU64::new(0),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Read a block into `page`.
    ///
    /// Bytes past the current end of the file read as zero.
    pub fn read(&self, block: &BlockId, page: &mut Page) -> Result<()> {
        let mut open_files = self.open_files.lock();
        let file = self.get_file_mut(&mut open_files, block.file_name())?;
        file.seek(SeekFrom::Start(self.offset_of(block)))?;

        let buf = page.data_mut();
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[filled..].fill(0);

        self.blocks_read.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Write `page` to a block and force it to stable storage
    pub fn write(&self, block: &BlockId, page: &Page) -> Result<()> {
        let mut open_files = self.open_files.lock();
        let file = self.get_file_mut(&mut open_files, block.file_name())?;
        file.seek(SeekFrom::Start(self.offset_of(block)))?;
        file.write_all(page.data())?;
        file.sync_data()?;

        self.blocks_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Extend a file by one zero-filled block and return its id
    pub fn append(&self, file_name: &str) -> Result<BlockId> {
        let mut open_files = self.open_files.lock();
        let file = self.get_file_mut(&mut open_files, file_name)?;
        let number = file.metadata()?.len() / self.block_size as u64;
        let block = BlockId::new(file_name, number);

        file.seek(SeekFrom::Start(self.offset_of(&block)))?;
        file.write_all(&vec![0u8; self.block_size])?;
        file.sync_data()?;

        debug!(%block, "appended block");
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
        Ok(block)
    }

    /// Number of blocks in a file
    pub fn size(&self, file_name: &str) -> Result<u64> {
        let mut open_files = self.open_files.lock();
        let file = self.get_file_mut(&mut open_files, file_name)?;
        Ok(file.metadata()?.len() / self.block_size as u64)
    }

    pub fn stats(&self) -> IoStats {
        IoStats {
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
        }
    }

    fn offset_of(&self, block: &BlockId) -> u64 {
        block.number() * self.block_size as u64
    }

    fn get_file_mut<'a>(
        &self,
        open_files: &'a mut HashMap<String, File>,
        file_name: &str,
    ) -> Result<&'a mut File> {
        match open_files.entry(file_name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(self.data_dir.join(file_name))?;
                debug!(file = file_name, "opened data file");
                Ok(entry.insert(file))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_size() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("db"), 400).unwrap();
        assert!(disk.is_new());

        assert_eq!(disk.size("t.tbl").unwrap(), 0);
        assert_eq!(disk.append("t.tbl").unwrap(), BlockId::new("t.tbl", 0));
        assert_eq!(disk.append("t.tbl").unwrap(), BlockId::new("t.tbl", 1));
        assert_eq!(disk.size("t.tbl").unwrap(), 2);
        assert_eq!(disk.size("other.tbl").unwrap(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path(), 400).unwrap();
        assert!(!disk.is_new());

        let block = disk.append("t.tbl").unwrap();
        let mut page = Page::new(400);
        page.set_int(80, 42).unwrap();
        page.set_string(100, "persisted").unwrap();
        disk.write(&block, &page).unwrap();

        let mut read_back = Page::new(400);
        disk.read(&block, &mut read_back).unwrap();
        assert_eq!(read_back, page);
        assert_eq!(disk.stats(), IoStats { blocks_read: 1, blocks_written: 2 });
    }

    #[test]
    fn test_read_past_end_is_zero_filled() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path(), 64).unwrap();

        let mut page = Page::new(64);
        page.set_int(0, 99).unwrap();
        disk.read(&BlockId::new("empty.tbl", 5), &mut page).unwrap();
        assert_eq!(page, Page::new(64));
    }

    #[test]
    fn test_reopen_removes_temp_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("temp1.tbl"), b"scratch").unwrap();
        std::fs::write(dir.path().join("keep.tbl"), b"data").unwrap();

        DiskManager::open(dir.path(), 64).unwrap();
        assert!(!dir.path().join("temp1.tbl").exists());
        assert!(dir.path().join("keep.tbl").exists());
    }
}
