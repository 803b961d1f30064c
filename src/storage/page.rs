//! Page management for ArcStore
//!
//! A page is the in-memory image of one block. It has no header of its own;
//! callers address it by byte offset. Integers are stored as 4-byte big-endian
//! values, and byte strings as a 4-byte length followed by the bytes.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Default block size in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 400;

/// Size of an encoded integer
pub const INT_SIZE: usize = 4;

/// Worst-case number of bytes a UTF-8 character needs
const MAX_BYTES_PER_CHAR: usize = 4;

/// A fixed-size page of bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    data: Vec<u8>,
}

impl Page {
    /// Create a zero-filled page
    pub fn new(block_size: usize) -> Self {
        Self {
            data: vec![0u8; block_size],
        }
    }

    /// Wrap existing bytes; the page size is the length of `data`
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Worst-case encoded size of a string of `strlen` characters
    pub fn max_length(strlen: usize) -> usize {
        INT_SIZE + strlen * MAX_BYTES_PER_CHAR
    }

    /// Encoded size of a specific string
    pub fn encoded_len(s: &str) -> usize {
        INT_SIZE + s.len()
    }

    pub fn block_size(&self) -> usize {
        self.data.len()
    }

    pub fn get_int(&self, offset: usize) -> Result<i32> {
        self.check(offset, INT_SIZE)?;
        Ok(BigEndian::read_i32(&self.data[offset..offset + INT_SIZE]))
    }

    pub fn set_int(&mut self, offset: usize, value: i32) -> Result<()> {
        self.check(offset, INT_SIZE)?;
        BigEndian::write_i32(&mut self.data[offset..offset + INT_SIZE], value);
        Ok(())
    }

    /// Read a length-prefixed byte string
    pub fn get_bytes(&self, offset: usize) -> Result<&[u8]> {
        let len = self.get_int(offset)?;
        if len < 0 {
            return Err(Error::InvalidString(offset));
        }
        let start = offset + INT_SIZE;
        self.check(start, len as usize)?;
        Ok(&self.data[start..start + len as usize])
    }

    /// Write a length-prefixed byte string.
    ///
    /// Fails without touching the page if the encoded value does not fit.
    pub fn set_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check(offset, INT_SIZE + bytes.len())?;
        let len = i32::try_from(bytes.len()).map_err(|_| Error::PageOverflow {
            offset,
            len: bytes.len(),
            block_size: self.data.len(),
        })?;
        BigEndian::write_i32(&mut self.data[offset..offset + INT_SIZE], len);
        let start = offset + INT_SIZE;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn get_string(&self, offset: usize) -> Result<String> {
        let bytes = self.get_bytes(offset)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidString(offset))
    }

    pub fn set_string(&mut self, offset: usize, value: &str) -> Result<()> {
        self.set_bytes(offset, value.as_bytes())
    }

    /// The `len` bytes starting at `offset`, with no length prefix
    pub fn read_range(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.check(offset, len)?;
        Ok(&self.data[offset..offset + len])
    }

    /// Overwrite the bytes starting at `offset` with `bytes` verbatim
    pub fn write_range(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check(offset, bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Get raw data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable raw data
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(Error::PageOverflow {
                offset,
                len,
                block_size: self.data.len(),
            }),
        }
    }
}
