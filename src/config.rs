//! Store and loader configuration

use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::Result;

/// Default number of archive lines read and inserted at once
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Settings for [`crate::store::SledStore`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the sled database
    pub path: PathBuf,

    /// Page cache size in bytes
    pub cache_capacity: u64,

    /// Background flush interval; `None` flushes only on explicit `flush()`
    pub flush_every_ms: Option<u64>,

    /// Group count an aggregation may hold in memory before spilling to disk
    pub max_groups_in_memory: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./redstore.db"),
            cache_capacity: 512 * 1024 * 1024,
            flush_every_ms: Some(1000),
            max_groups_in_memory: 100_000,
        }
    }
}

impl StoreConfig {
    pub fn at<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }
}

/// Settings for [`crate::ingest::BulkLoader`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Lines per batch (the last batch of a file may be shorter)
    pub batch_size: usize,

    /// Use the record fullname (`name`) as the store identity key, so loading
    /// the same archive twice does not duplicate records
    pub key_by_fullname: bool,

    /// Load independent archive files on the rayon pool
    pub parallel_files: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            key_by_fullname: false,
            parallel_files: false,
        }
    }
}

impl LoaderConfig {
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }
}

/// Combined configuration file for the ingest binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub loader: LoaderConfig,
}

impl Config {
    /// Load from a JSON file; missing keys fall back to defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}
