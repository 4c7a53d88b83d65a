use std::fs;
use std::path::PathBuf;
use crate::core::error::Result;

/// Directory structure for data files
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,   // Root directory
    pub shards_dir: PathBuf, // Per-shard stream stores
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let shards_dir = base_dir.join("shards");

        fs::create_dir_all(&shards_dir)?;

        Ok(StorageLayout {
            base_dir,
            shards_dir,
        })
    }

    pub fn shard_path(&self, shard: u64) -> PathBuf {
        self.shards_dir.join(format!("shard_{:08}.db", shard))
    }

    pub fn index_path(&self) -> PathBuf {
        self.base_dir.join("index.db")
    }

    pub fn translate_path(&self) -> PathBuf {
        self.base_dir.join("translate.db")
    }
}
