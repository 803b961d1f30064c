//! Block identifiers

use std::fmt;

/// Block number reserved for the per-file end-of-file marker.
///
/// It never names a real block; transactions lock it to serialize appends
/// against size queries on the same file.
pub const END_OF_FILE: u64 = u64::MAX;

/// Identifies a block by file name and block number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    file_name: String,
    number: u64,
}

impl BlockId {
    pub fn new(file_name: impl Into<String>, number: u64) -> Self {
        Self {
            file_name: file_name.into(),
            number,
        }
    }

    /// The end-of-file marker block for `file_name`
    pub fn end_of_file(file_name: impl Into<String>) -> Self {
        Self::new(file_name, END_OF_FILE)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn is_end_of_file(&self) -> bool {
        self.number == END_OF_FILE
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_end_of_file() {
            write!(f, "[file {}, end of file]", self.file_name)
        } else {
            write!(f, "[file {}, block {}]", self.file_name, self.number)
        }
    }
}
