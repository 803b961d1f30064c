use std::path::Path;
use std::time::Duration;

use arcstore::{Database, StorageConfig};

/// 400-byte blocks, 8 buffers, 2 second waits
pub fn config(dir: &Path) -> StorageConfig {
    StorageConfig::new(dir)
        .block_size(400)
        .buffer_pool_size(8)
        .timeout(Duration::from_secs(2))
}

pub fn open(dir: &Path) -> Database {
    Database::open_and_recover(config(dir)).unwrap()
}
