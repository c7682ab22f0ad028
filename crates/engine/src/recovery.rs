//! Cold-start recovery: data-file enumeration, the hint-file fast path, and
//! full log replay with the batch-terminator protocol.
//!
//! Replay applies plain records (sequence 0) immediately. Batch-tagged
//! records park in a per-sequence pending list and only reach the key
//! directory once the matching terminator is seen — a batch whose
//! terminator never hit the disk is discarded wholesale.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use logfile::record::{parse_record_key, LogRecord, Position, RecordType};
use logfile::{DataFile, IoMode, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME};

use crate::error::{open_err, Error, Result};
use crate::{Engine, IndexType, NON_BATCH_SEQ_NO};

impl Engine {
    /// Enumerates `*.data` files, opens them (highest id becomes active),
    /// and returns the sorted ids.
    pub(crate) fn load_data_files(&self) -> Result<Vec<u32>> {
        let mut file_ids = Vec::new();
        for entry in fs::read_dir(&self.options.dir_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
                let file_id: u32 = stem.parse().map_err(|_| Error::DataDirectoryCorrupted)?;
                file_ids.push(file_id);
            }
        }
        file_ids.sort_unstable();

        // The mmap backend only pays off during replay; the on-disk index
        // backend performs none, so it opens writable files directly.
        let mode = if self.options.mmap_at_startup && self.options.index_type != IndexType::BPlusTree
        {
            IoMode::Mmap
        } else {
            IoMode::Standard
        };

        let mut files = self.files.write();
        for (i, &file_id) in file_ids.iter().enumerate() {
            let data_file = DataFile::open(&self.options.dir_path, file_id, mode)?;
            if i == file_ids.len() - 1 {
                files.active = Some(data_file);
            } else {
                files.older.insert(file_id, Arc::new(data_file));
            }
        }
        Ok(file_ids)
    }

    /// Fast path after a merge: the hint file maps keys straight to packed
    /// positions, no value bytes to skip over.
    pub(crate) fn load_index_from_hint_file(&self) -> Result<()> {
        if !self.options.dir_path.join(HINT_FILE_NAME).exists() {
            return Ok(());
        }

        let hint = DataFile::open_hint(&self.options.dir_path)?;
        let mut offset = 0i64;
        while let Some((record, size)) = hint.read_record(offset).map_err(open_err)? {
            let pos = Position::decode(&record.value).map_err(open_err)?;
            self.index.put(&record.key, pos)?;
            offset += size as i64;
        }
        Ok(())
    }

    /// Replays every post-merge data file into the key directory and
    /// restores the sequence counter and the active write offset.
    pub(crate) fn load_index_from_data_files(&self, file_ids: &[u32]) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        // Files below this id were merged and arrived via the hint file.
        let mut non_merge_file_id = None;
        if self
            .options
            .dir_path
            .join(MERGE_FINISHED_FILE_NAME)
            .exists()
        {
            non_merge_file_id = Some(self.non_merge_file_id(&self.options.dir_path)?);
        }

        let mut pending: HashMap<u64, Vec<(LogRecord, Position)>> = HashMap::new();
        let mut current_seq = NON_BATCH_SEQ_NO;
        let mut last_offset = 0i64;

        let mut files = self.files.write();
        for (i, &file_id) in file_ids.iter().enumerate() {
            if let Some(boundary) = non_merge_file_id {
                if file_id < boundary {
                    continue;
                }
            }

            let mut offset = 0i64;
            {
                let data_file: &DataFile = if files
                    .active
                    .as_ref()
                    .map(|active| active.file_id == file_id)
                    .unwrap_or(false)
                {
                    match files.active.as_ref() {
                        Some(active) => active,
                        None => return Err(Error::DataFileNotFound),
                    }
                } else {
                    match files.older.get(&file_id) {
                        Some(file) => file.as_ref(),
                        None => return Err(Error::DataFileNotFound),
                    }
                };

                while let Some((record, size)) = data_file.read_record(offset).map_err(open_err)? {
                    let pos = Position {
                        file_id,
                        offset,
                        size: size as u32,
                    };
                    let (seq, user_key) = parse_record_key(&record.key).map_err(open_err)?;

                    if seq == NON_BATCH_SEQ_NO {
                        self.apply_to_index(user_key, record.rec_type, pos)?;
                    } else if record.rec_type == RecordType::BatchTerminator {
                        // The whole batch is committed; flush it in order.
                        if let Some(records) = pending.remove(&seq) {
                            for (rec, rec_pos) in records {
                                self.apply_to_index(&rec.key, rec.rec_type, rec_pos)?;
                            }
                        }
                    } else {
                        let buffered = LogRecord {
                            key: user_key.to_vec(),
                            value: record.value,
                            rec_type: record.rec_type,
                        };
                        pending.entry(seq).or_default().push((buffered, pos));
                    }

                    if seq > current_seq {
                        current_seq = seq;
                    }
                    offset += size as i64;
                }
            }

            if i == file_ids.len() - 1 {
                last_offset = offset;
            }
        }

        // New writes land right after the last complete record.
        if let Some(active) = files.active.as_mut() {
            active.write_off = last_offset;
        }

        if !pending.is_empty() {
            log::warn!(
                "discarded {} uncommitted batch(es) during replay",
                pending.len()
            );
        }
        self.seq_no.store(current_seq, Ordering::SeqCst);
        Ok(())
    }

    /// Restores the sequence counter for the on-disk index backend, then
    /// removes the file so a crash cannot replay a stale counter.
    pub(crate) fn load_seq_no(&self) -> Result<()> {
        let path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
        if !path.exists() {
            return Ok(());
        }

        let file = DataFile::open_seq_no(&self.options.dir_path)?;
        let record = match file.read_record(0).map_err(open_err)? {
            Some((record, _)) => record,
            None => return Err(Error::DataDirectoryCorrupted),
        };
        let text =
            std::str::from_utf8(&record.value).map_err(|_| Error::DataDirectoryCorrupted)?;
        let seq = text.parse::<u64>().map_err(|_| Error::DataDirectoryCorrupted)?;
        self.seq_no.store(seq, Ordering::SeqCst);
        fs::remove_file(path)?;
        Ok(())
    }

    /// Reopens every data file with standard IO after an mmap-backed scan.
    pub(crate) fn reset_io_mode(&self) -> Result<()> {
        let mut files = self.files.write();
        if let Some(active) = files.active.as_mut() {
            active.set_io_mode(&self.options.dir_path, IoMode::Standard)?;
        }
        let older_ids: Vec<u32> = files.older.keys().copied().collect();
        for file_id in older_ids {
            if let Some(file) = files.older.get_mut(&file_id).and_then(Arc::get_mut) {
                file.set_io_mode(&self.options.dir_path, IoMode::Standard)?;
            }
        }
        Ok(())
    }

    /// One replayed record's effect on the key directory.
    fn apply_to_index(&self, key: &[u8], rec_type: RecordType, pos: Position) -> Result<()> {
        let old = match rec_type {
            RecordType::Normal => self.index.put(key, pos)?,
            RecordType::Tombstone => {
                let (old, _) = self.index.delete(key)?;
                self.reclaim_size.fetch_add(pos.size as u64, Ordering::Relaxed);
                old
            }
            RecordType::BatchTerminator => None,
        };
        if let Some(old) = old {
            self.reclaim_size.fetch_add(old.size as u64, Ordering::Relaxed);
        }
        Ok(())
    }
}
