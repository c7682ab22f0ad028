//! User-facing configuration for the engine, batches, and iterators.

use std::path::PathBuf;

pub use keydir::IndexType;

use crate::error::{Error, Result};

/// Engine configuration, validated at [`crate::Engine::open`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the data files, the lock file, and the auxiliary
    /// hint/marker files.
    pub dir_path: PathBuf,

    /// Size limit of the active data file; crossing it rolls the file over.
    pub data_file_size: u64,

    /// Fsync after every single write.
    pub sync_write: bool,

    /// When non-zero (and `sync_write` is off), fsync once this many bytes
    /// have accumulated since the last sync.
    pub bytes_per_sync: u64,

    /// Which backend holds the key directory.
    pub index_type: IndexType,

    /// Scan existing data files through a read-only memory map at open.
    /// Ignored for the on-disk index backend, which performs no scan.
    pub mmap_at_startup: bool,

    /// Fraction of the directory that must be reclaimable before a merge is
    /// allowed to run. Between 0 and 1.
    pub data_file_merge_ratio: f32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("cinderkv-data"),
            data_file_size: 256 * 1024 * 1024,
            sync_write: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
            data_file_merge_ratio: 0.5,
        }
    }
}

impl Options {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::InvalidOptions("dir_path must not be empty".into()));
        }
        if self.data_file_size == 0 {
            return Err(Error::InvalidOptions(
                "data_file_size must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.data_file_merge_ratio) {
            return Err(Error::InvalidOptions(
                "data_file_merge_ratio must be between 0 and 1".into(),
            ));
        }
        Ok(())
    }
}

/// Options for [`crate::Engine::new_iterator`].
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// When non-empty, only keys starting with this prefix are yielded.
    pub prefix: Vec<u8>,

    /// Traverse in descending key order.
    pub reverse: bool,
}

/// Options for [`crate::Engine::new_batch`].
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Largest number of pending writes a single commit may carry.
    pub max_batch_num: usize,

    /// Fsync the active file once the batch (terminator included) is down.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: 10_000,
            sync_writes: true,
        }
    }
}
