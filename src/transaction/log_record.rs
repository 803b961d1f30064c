//! Log records written by the recovery manager
//!
//! Encoding (big-endian):
//!
//! ```text
//! CHECKPOINT  [op]
//! START       [op][tx: u64]
//! COMMIT      [op][tx: u64]
//! ROLLBACK    [op][tx: u64]
//! SETINT      [op][tx: u64][file][block: u64][offset: u32][old: i32]
//! SETSTRING   [op][tx: u64][file][block: u64][offset: u32][old: bytes]
//! ```
//!
//! `op` is one byte; strings and byte runs are a u32 byte length followed by
//! the bytes. A SETSTRING before image is the raw content of every byte the
//! write covered, length prefix included, so undo restores the range exactly
//! whatever was stored there before.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use super::{Transaction, TxId};
use crate::error::{Error, Result};
use crate::storage::BlockId;

const CHECKPOINT: u8 = 0;
const START: u8 = 1;
const COMMIT: u8 = 2;
const ROLLBACK: u8 = 3;
const SET_INT: u8 = 4;
const SET_STRING: u8 = 5;

/// A single log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Checkpoint,
    Start {
        tx: TxId,
    },
    Commit {
        tx: TxId,
    },
    Rollback {
        tx: TxId,
    },
    /// Before image of an integer write
    SetInt {
        tx: TxId,
        block: BlockId,
        offset: usize,
        old_value: i32,
    },
    /// Before image of the byte range a string write covered
    SetString {
        tx: TxId,
        block: BlockId,
        offset: usize,
        old_bytes: Vec<u8>,
    },
}

impl LogRecord {
    /// Transaction that wrote the record; `None` for checkpoints
    pub fn tx_id(&self) -> Option<TxId> {
        match self {
            LogRecord::Checkpoint => None,
            LogRecord::Start { tx }
            | LogRecord::Commit { tx }
            | LogRecord::Rollback { tx }
            | LogRecord::SetInt { tx, .. }
            | LogRecord::SetString { tx, .. } => Some(*tx),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        match self {
            LogRecord::Checkpoint => buf.put_u8(CHECKPOINT),
            LogRecord::Start { tx } => {
                buf.put_u8(START);
                buf.put_u64(*tx);
            }
            LogRecord::Commit { tx } => {
                buf.put_u8(COMMIT);
                buf.put_u64(*tx);
            }
            LogRecord::Rollback { tx } => {
                buf.put_u8(ROLLBACK);
                buf.put_u64(*tx);
            }
            LogRecord::SetInt {
                tx,
                block,
                offset,
                old_value,
            } => {
                buf.put_u8(SET_INT);
                buf.put_u64(*tx);
                put_block(&mut buf, block, *offset);
                buf.put_i32(*old_value);
            }
            LogRecord::SetString {
                tx,
                block,
                offset,
                old_bytes,
            } => {
                buf.put_u8(SET_STRING);
                buf.put_u64(*tx);
                put_block(&mut buf, block, *offset);
                put_bytes(&mut buf, old_bytes);
            }
        }
        buf.to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        let op = take(&mut buf, 1)?.get_u8();
        let record = match op {
            CHECKPOINT => LogRecord::Checkpoint,
            START => LogRecord::Start {
                tx: take_u64(&mut buf)?,
            },
            COMMIT => LogRecord::Commit {
                tx: take_u64(&mut buf)?,
            },
            ROLLBACK => LogRecord::Rollback {
                tx: take_u64(&mut buf)?,
            },
            SET_INT => {
                let tx = take_u64(&mut buf)?;
                let (block, offset) = take_block(&mut buf)?;
                let old_value = take(&mut buf, 4)?.get_i32();
                LogRecord::SetInt {
                    tx,
                    block,
                    offset,
                    old_value,
                }
            }
            SET_STRING => {
                let tx = take_u64(&mut buf)?;
                let (block, offset) = take_block(&mut buf)?;
                let old_bytes = take_bytes(&mut buf)?.to_vec();
                LogRecord::SetString {
                    tx,
                    block,
                    offset,
                    old_bytes,
                }
            }
            other => {
                return Err(Error::CorruptLogRecord(format!(
                    "unknown record type {}",
                    other
                )))
            }
        };
        if buf.has_remaining() {
            return Err(Error::CorruptLogRecord(format!(
                "{} trailing bytes after {}",
                buf.remaining(),
                record
            )));
        }
        Ok(record)
    }

    /// Restore the before image. Records without one do nothing.
    pub fn undo(&self, tx: &mut Transaction) -> Result<()> {
        match self {
            LogRecord::SetInt {
                block,
                offset,
                old_value,
                ..
            } => {
                tx.pin(block)?;
                tx.set_int_unlogged(block, *offset, *old_value)?;
                tx.unpin(block)
            }
            LogRecord::SetString {
                block,
                offset,
                old_bytes,
                ..
            } => {
                tx.pin(block)?;
                tx.restore_unlogged(block, *offset, old_bytes)?;
                tx.unpin(block)
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Checkpoint => write!(f, "<CHECKPOINT>"),
            LogRecord::Start { tx } => write!(f, "<START {}>", tx),
            LogRecord::Commit { tx } => write!(f, "<COMMIT {}>", tx),
            LogRecord::Rollback { tx } => write!(f, "<ROLLBACK {}>", tx),
            LogRecord::SetInt {
                tx,
                block,
                offset,
                old_value,
            } => write!(f, "<SETINT {} {} {} {}>", tx, block, offset, old_value),
            LogRecord::SetString {
                tx,
                block,
                offset,
                old_bytes,
            } => write!(f, "<SETSTRING {} {} {} {:02x?}>", tx, block, offset, old_bytes),
        }
    }
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn put_block(buf: &mut BytesMut, block: &BlockId, offset: usize) {
    put_bytes(buf, block.file_name().as_bytes());
    buf.put_u64(block.number());
    buf.put_u32(offset as u32);
}

/// Split `n` bytes off the front of `buf`
fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(Error::CorruptLogRecord(format!(
            "record truncated: needed {} more bytes, found {}",
            n,
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn take_u64(buf: &mut &[u8]) -> Result<u64> {
    Ok(take(buf, 8)?.get_u64())
}

fn take_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = take(buf, 4)?.get_u32() as usize;
    take(buf, len)
}

fn take_string(buf: &mut &[u8]) -> Result<String> {
    let bytes = take_bytes(buf)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::CorruptLogRecord("string operand is not valid UTF-8".to_string()))
}

fn take_block(buf: &mut &[u8]) -> Result<(BlockId, usize)> {
    let file_name = take_string(buf)?;
    let number = take_u64(buf)?;
    let offset = take(buf, 4)?.get_u32() as usize;
    Ok((BlockId::new(file_name, number), offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_records_round_trip() {
        let records = vec![
            LogRecord::Checkpoint,
            LogRecord::Start { tx: 3 },
            LogRecord::SetInt {
                tx: 3,
                block: BlockId::new("users.tbl", 12),
                offset: 80,
                old_value: -5,
            },
            LogRecord::SetString {
                tx: 3,
                block: BlockId::new("users.tbl", 12),
                offset: 100,
                old_bytes: vec![0, 0, 0, 6, b'b', b'e', b'f', 0xff],
            },
            LogRecord::Rollback { tx: 3 },
        ];
        for record in records {
            assert_eq!(LogRecord::from_bytes(&record.to_bytes()).unwrap(), record);
        }
    }

    #[test]
    fn test_tx_id() {
        assert_eq!(LogRecord::Checkpoint.tx_id(), None);
        assert_eq!(LogRecord::Commit { tx: 9 }.tx_id(), Some(9));
    }

    #[test]
    fn test_display() {
        let record = LogRecord::SetInt {
            tx: 3,
            block: BlockId::new("f", 0),
            offset: 80,
            old_value: 1,
        };
        assert_eq!(record.to_string(), "<SETINT 3 [file f, block 0] 80 1>");
        assert_eq!(LogRecord::Checkpoint.to_string(), "<CHECKPOINT>");

        let record = LogRecord::SetString {
            tx: 4,
            block: BlockId::new("f", 1),
            offset: 8,
            old_bytes: vec![0, 0, 0, 1, 0x2a],
        };
        assert_eq!(
            record.to_string(),
            "<SETSTRING 4 [file f, block 1] 8 [00, 00, 00, 01, 2a]>"
        );
    }

    #[test]
    fn test_malformed_records_are_rejected() {
        assert!(matches!(
            LogRecord::from_bytes(&[]),
            Err(Error::CorruptLogRecord(_))
        ));
        assert!(matches!(
            LogRecord::from_bytes(&[42]),
            Err(Error::CorruptLogRecord(_))
        ));

        let mut truncated = LogRecord::SetString {
            tx: 1,
            block: BlockId::new("f", 0),
            offset: 0,
            old_bytes: vec![0, 0, 0, 3, b'a', b'b', b'c'],
        }
        .to_bytes();
        truncated.pop();
        assert!(matches!(
            LogRecord::from_bytes(&truncated),
            Err(Error::CorruptLogRecord(_))
        ));

        let mut trailing = LogRecord::Commit { tx: 1 }.to_bytes();
        trailing.push(0);
        assert!(matches!(
            LogRecord::from_bytes(&trailing),
            Err(Error::CorruptLogRecord(_))
        ));
    }
}
