//! # CinderKV — a Bitcask-style embedded key-value storage engine
//!
//! An append-only log of records on disk plus a complete in-memory key
//! directory mapping every live key to the position of its latest value.
//! Reads are one directory lookup and one positioned file read; writes are
//! one append plus one directory update.
//!
//! ## Architecture
//!
//! ```text
//! Caller
//!   |
//!   v
//! ┌─────────────────────────────────────────────────┐
//! │                    ENGINE                       │
//! │                                                 │
//! │ write.rs → append to active data file           │
//! │              |          (size limit crossed?)   │
//! │              |                 yes              │
//! │              v                                  │
//! │           roll over → new active file           │
//! │              |                                  │
//! │              v                                  │
//! │           keydir update (old position reclaim)  │
//! │                                                 │
//! │ read.rs  → keydir lookup → positioned read      │
//! │ batch.rs → seq-tagged appends + terminator      │
//! │ merge.rs → rewrite live records, swap at open   │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                              |
//! |---------------|------------------------------------------------------|
//! | `lib.rs`      | `Engine` struct, open, close, sync, stat, `Drop`     |
//! | [`options`]   | `Options`, iterator and batch options, validation    |
//! | [`error`]     | public error enum                                    |
//! | `write.rs`    | `put`, `delete`, the append/rollover/sync-policy path|
//! | `read.rs`     | `get`, `list_keys`, `fold`, positioned value reads   |
//! | `recovery.rs` | file enumeration, hint fast path, log replay         |
//! | `batch.rs`    | atomic multi-key writes under one sequence number    |
//! | `iterator.rs` | ordered user cursor with prefix filter               |
//! | `merge.rs`    | compaction into a sibling directory, swap-in at open |
//!
//! ## Crash Safety
//!
//! Every record carries a CRC; recovery replays the log and discards any
//! batch whose terminator never made it to disk. A merge only takes effect
//! once its `merge.finished` marker is durable — until then the sibling
//! directory is simply deleted at the next open.

mod batch;
mod fsutil;
mod iterator;
mod merge;
mod read;
mod recovery;
mod write;

pub mod error;
pub mod options;

pub use batch::WriteBatch;
pub use error::{Error, Result};
pub use iterator::Iter;
pub use options::{IndexType, IteratorOptions, Options, WriteBatchOptions};

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::RwLock;

use keydir::Indexer;
use logfile::record::{LogRecord, RecordType};
use logfile::DataFile;

/// Name of the directory lock file.
pub(crate) const FILE_LOCK_NAME: &str = "flock";

/// Sequence number carried by writes outside any batch.
pub(crate) const NON_BATCH_SEQ_NO: u64 = 0;

/// Key of the single record inside the `seq-no` file.
pub(crate) const SEQ_NO_KEY: &[u8] = b"seq.no";

/// The open file set: one writable active file, the rest read-only.
pub(crate) struct FileSet {
    pub(crate) active: Option<DataFile>,
    /// Older files are shared so a merge can read its snapshot while new
    /// writes proceed; their contents never change once rotated.
    pub(crate) older: BTreeMap<u32, Arc<DataFile>>,
    /// Bytes appended since the last sync, for the bytes-per-sync policy.
    pub(crate) bytes_since_sync: u64,
}

/// A Bitcask storage engine instance bound to one directory.
///
/// The engine is `Send + Sync`; share it as `Arc<Engine>`. Reads run
/// concurrently; writes serialize on the internal file lock.
pub struct Engine {
    pub(crate) options: Options,
    pub(crate) files: RwLock<FileSet>,
    pub(crate) index: Box<dyn Indexer>,
    /// Last committed batch sequence number.
    pub(crate) seq_no: AtomicU64,
    /// Single-flight flag for merge.
    pub(crate) merging: AtomicBool,
    /// Approximate bytes of superseded and tombstoned records since open.
    pub(crate) reclaim_size: AtomicU64,
    lock_file: File,
    closed: AtomicBool,
}

/// A point-in-time summary returned by [`Engine::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Live keys in the directory.
    pub key_num: usize,
    /// Data files on disk, the active file included.
    pub data_file_num: usize,
    /// Approximate bytes a merge could reclaim.
    pub reclaimable_size: u64,
    /// Total bytes under the data directory.
    pub disk_size: u64,
}

impl Engine {
    /// Opens the engine rooted at `options.dir_path`, creating the directory
    /// when missing and recovering the key directory from disk.
    ///
    /// # Errors
    ///
    /// `InvalidOptions` for a bad configuration, `DatabaseInUse` when
    /// another process holds the directory lock, and
    /// `DataDirectoryCorrupted` when recovery hits an undecodable record.
    pub fn open(options: Options) -> Result<Engine> {
        options.validate()?;
        fs::create_dir_all(&options.dir_path)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(options.dir_path.join(FILE_LOCK_NAME))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(Error::DatabaseInUse);
        }

        let index = keydir::new_indexer(options.index_type, &options.dir_path, options.sync_write)?;

        let engine = Engine {
            options,
            files: RwLock::new(FileSet {
                active: None,
                older: BTreeMap::new(),
                bytes_since_sync: 0,
            }),
            index,
            seq_no: AtomicU64::new(NON_BATCH_SEQ_NO),
            merging: AtomicBool::new(false),
            reclaim_size: AtomicU64::new(0),
            lock_file,
            closed: AtomicBool::new(false),
        };

        // A finished merge left by a previous run swaps in before anything
        // else looks at the file set.
        engine.load_merge_files()?;

        let file_ids = engine.load_data_files()?;

        if engine.options.index_type != IndexType::BPlusTree {
            engine.load_index_from_hint_file()?;
            engine.load_index_from_data_files(&file_ids)?;
            if engine.options.mmap_at_startup {
                engine.reset_io_mode()?;
            }
        } else {
            // The on-disk directory is already complete; only the sequence
            // counter and the active write offset need restoring.
            engine.load_seq_no()?;
            let mut files = engine.files.write();
            if let Some(active) = files.active.as_mut() {
                active.write_off = active.size()? as i64;
            }
        }

        log::info!(
            "opened {} with {} data file(s), {} key(s)",
            engine.options.dir_path.display(),
            file_ids.len(),
            engine.index.len()
        );
        Ok(engine)
    }

    /// Flushes the active data file to disk.
    pub fn sync(&self) -> Result<()> {
        let files = self.files.write();
        if let Some(active) = &files.active {
            active.sync()?;
        }
        Ok(())
    }

    /// Closes the engine: flushes and drops every file, closes the index,
    /// and releases the directory lock. Safe to call more than once; only
    /// the first call does work. `Drop` calls this best-effort.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut files = self.files.write();

        self.index.close()?;
        if self.options.index_type == IndexType::BPlusTree {
            // The on-disk backend never replays the log, so the committed
            // sequence counter must travel through its own file.
            let mut seq_file = DataFile::open_seq_no(&self.options.dir_path)?;
            let record = LogRecord {
                key: SEQ_NO_KEY.to_vec(),
                value: self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
                rec_type: RecordType::Normal,
            };
            let (frame, _) = record.encode();
            seq_file.append(&frame)?;
            seq_file.sync()?;
        }

        if let Some(active) = &files.active {
            active.sync()?;
        }
        files.active = None;
        files.older.clear();

        self.lock_file.unlock()?;
        Ok(())
    }

    /// A point-in-time summary of the engine.
    pub fn stat(&self) -> Result<Stat> {
        let files = self.files.read();
        let mut data_file_num = files.older.len();
        if files.active.is_some() {
            data_file_num += 1;
        }
        Ok(Stat {
            key_num: self.index.len(),
            data_file_num,
            reclaimable_size: self.reclaim_size.load(Ordering::Relaxed),
            disk_size: fsutil::dir_size(&self.options.dir_path)?,
        })
    }

    /// The options this engine was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let files = self.files.read();
        f.debug_struct("Engine")
            .field("dir_path", &self.options.dir_path)
            .field("index_type", &self.options.index_type)
            .field("keys", &self.index.len())
            .field("active_file", &files.active.as_ref().map(|file| file.file_id))
            .field("older_files", &files.older.len())
            .field("seq_no", &self.seq_no.load(Ordering::Relaxed))
            .field("reclaim_size", &self.reclaim_size.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests;
