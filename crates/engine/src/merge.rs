//! Merge: rewrite live records into a sibling directory, then atomically
//! swap the rewritten set in at the next open.
//!
//! The running engine never mutates its own file set mid-merge. It rotates
//! the active file (so the snapshot of older files is closed), rewrites
//! every still-live record through a second engine instance rooted at
//! `<dir>-merge`, emits a hint file, and finally writes the
//! `merge.finished` marker. The marker is the commit point: an open that
//! finds it deletes the superseded originals and renames the rewritten
//! files into place; an open that does not simply deletes the sibling
//! directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keydir::BPTREE_INDEX_FILE_NAME;
use logfile::record::{encode_key_with_seq, parse_record_key, LogRecord, RecordType};
use logfile::{data_file_path, DataFile, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME};

use crate::error::{open_err, Error, Result};
use crate::fsutil;
use crate::{Engine, FILE_LOCK_NAME, NON_BATCH_SEQ_NO};

/// Suffix of the sibling working directory.
const MERGE_DIR_SUFFIX: &str = "-merge";

/// Key of the single record inside `merge.finished`.
const MERGE_FINISHED_KEY: &[u8] = b"merge-finished";

/// Clears the single-flight flag on every exit path.
struct MergeGuard<'a>(&'a AtomicBool);

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Engine {
    /// Rewrites all live records from files older than the current active
    /// file into a fresh sibling directory.
    ///
    /// # Errors
    ///
    /// `MergeInProgress` when another merge is running,
    /// `MergeRatioUnreached` when reclaimable space is below the configured
    /// ratio, and `NoEnoughSpaceForMerge` when the volume cannot hold a
    /// rewritten copy of the live set. Both gate failures are retryable.
    pub fn merge(&self) -> Result<()> {
        let mut files = self.files.write();
        if files.active.is_none() {
            return Ok(());
        }
        if self.merging.swap(true, Ordering::SeqCst) {
            return Err(Error::MergeInProgress);
        }
        let _merging = MergeGuard(&self.merging);

        let total_size = fsutil::dir_size(&self.options.dir_path)?;
        let reclaimable = self.reclaim_size.load(Ordering::SeqCst);
        if (reclaimable as f64) < f64::from(self.options.data_file_merge_ratio) * total_size as f64
        {
            log::debug!(
                "merge skipped: {} reclaimable of {} on disk",
                reclaimable,
                total_size
            );
            return Err(Error::MergeRatioUnreached);
        }
        let live_size = total_size.saturating_sub(reclaimable);
        if live_size >= fsutil::available_space(&self.options.dir_path)? {
            return Err(Error::NoEnoughSpaceForMerge);
        }

        // Seal the snapshot: everything below the new active file id gets
        // merged; new writes land beyond it and are untouched.
        self.rotate_active(&mut files)?;
        let non_merge_file_id = match files.active.as_ref() {
            Some(active) => active.file_id,
            None => return Err(Error::DataFileNotFound),
        };
        let merge_files: Vec<Arc<DataFile>> = files.older.values().cloned().collect();
        drop(files);

        log::info!(
            "merge started: {} file(s) below id {}",
            merge_files.len(),
            non_merge_file_id
        );

        let merge_path = merge_path(&self.options.dir_path);
        if merge_path.exists() {
            fs::remove_dir_all(&merge_path)?;
        }
        fs::create_dir_all(&merge_path)?;

        let mut merge_options = self.options.clone();
        merge_options.dir_path = merge_path.clone();
        merge_options.sync_write = false;
        let merge_engine = Engine::open(merge_options)?;

        let mut hint_file = DataFile::open_hint(&merge_path)?;

        for data_file in &merge_files {
            let mut offset = 0i64;
            while let Some((record, size)) = data_file.read_record(offset)? {
                let (_, user_key) = parse_record_key(&record.key)?;

                // A record is live iff the directory still points exactly
                // here; everything else is superseded or tombstoned.
                let live = match self.index.get(user_key)? {
                    Some(pos) => pos.file_id == data_file.file_id && pos.offset == offset,
                    None => false,
                };
                if live {
                    // Committed data needs no batch tag in its next life.
                    let rewritten = LogRecord {
                        key: encode_key_with_seq(user_key, NON_BATCH_SEQ_NO),
                        value: record.value,
                        rec_type: RecordType::Normal,
                    };
                    let new_pos = {
                        let mut merge_set = merge_engine.files.write();
                        merge_engine.append_record(&mut merge_set, &rewritten)?
                    };
                    hint_file.append_hint_record(user_key, new_pos)?;
                }
                offset += size as i64;
            }
        }

        hint_file.sync()?;
        merge_engine.sync()?;

        // The marker commits the merge; everything before it is disposable.
        let mut finished = DataFile::open_merge_finished(&merge_path)?;
        let marker = LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: non_merge_file_id.to_string().into_bytes(),
            rec_type: RecordType::Normal,
        };
        let (frame, _) = marker.encode();
        finished.append(&frame)?;
        finished.sync()?;

        merge_engine.close()?;

        log::info!("merge finished: rewrote into {}", merge_path.display());
        Ok(())
    }

    /// Open-time half of the handshake: applies a finished merge left on
    /// disk, or deletes the remnants of an unfinished one.
    pub(crate) fn load_merge_files(&self) -> Result<()> {
        let merge_path = merge_path(&self.options.dir_path);
        if !merge_path.exists() {
            return Ok(());
        }
        let result = self.swap_in_merge_files(&merge_path);
        let _ = fs::remove_dir_all(&merge_path);
        result
    }

    fn swap_in_merge_files(&self, merge_path: &Path) -> Result<()> {
        let mut merge_finished = false;
        let mut names = Vec::new();
        for entry in fs::read_dir(merge_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == MERGE_FINISHED_FILE_NAME {
                merge_finished = true;
            }
            // The merge instance's own lock and index files stay behind;
            // moving them would clobber the primary's.
            if name == FILE_LOCK_NAME || name == SEQ_NO_FILE_NAME || name == BPTREE_INDEX_FILE_NAME
            {
                continue;
            }
            names.push(name);
        }
        if !merge_finished {
            return Ok(());
        }

        // Everything below the boundary id was rewritten; drop the originals
        // first, then move the rewritten set (hint file and marker included).
        let boundary = self.non_merge_file_id(merge_path)?;
        for file_id in 0..boundary {
            let path = data_file_path(&self.options.dir_path, file_id);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        for name in names {
            fs::rename(merge_path.join(&name), self.options.dir_path.join(&name))?;
        }
        log::info!("applied finished merge: files below id {} replaced", boundary);
        Ok(())
    }

    /// Reads the first non-merged file id out of a `merge.finished` marker.
    pub(crate) fn non_merge_file_id(&self, dir: &Path) -> Result<u32> {
        let file = DataFile::open_merge_finished(dir)?;
        let record = match file.read_record(0).map_err(open_err)? {
            Some((record, _)) => record,
            None => return Err(Error::DataDirectoryCorrupted),
        };
        let text =
            std::str::from_utf8(&record.value).map_err(|_| Error::DataDirectoryCorrupted)?;
        text.parse::<u32>().map_err(|_| Error::DataDirectoryCorrupted)
    }
}

/// Sibling working directory: `/data/store` merges into `/data/store-merge`.
fn merge_path(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(MERGE_DIR_SUFFIX);
    dir.with_file_name(name)
}
