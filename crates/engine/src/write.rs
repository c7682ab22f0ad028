//! Write path: `put`, `delete`, and the shared append/rollover machinery.
//!
//! Every mutation becomes one encoded record appended to the active data
//! file under the engine's write lock, then a key-directory update. The
//! directory update happens after the lock is released; readers that race
//! it see the previous committed state, which is the order the log itself
//! records.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use logfile::record::{encode_key_with_seq, LogRecord, Position, RecordType};
use logfile::{DataFile, IoMode};

use crate::error::{Error, Result};
use crate::{Engine, FileSet, NON_BATCH_SEQ_NO};

impl Engine {
    /// Stores `value` under `key`, overwriting any previous value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }

        let record = LogRecord {
            key: encode_key_with_seq(key, NON_BATCH_SEQ_NO),
            value: value.to_vec(),
            rec_type: RecordType::Normal,
        };
        let pos = {
            let mut files = self.files.write();
            self.append_record(&mut files, &record)?
        };

        if let Some(old) = self.index.put(key, pos)? {
            self.reclaim_size.fetch_add(old.size as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Removes `key`. Deleting an absent key is a silent success — no
    /// tombstone is written for a key the directory does not hold.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        if self.index.get(key)?.is_none() {
            return Ok(());
        }

        let record = LogRecord {
            key: encode_key_with_seq(key, NON_BATCH_SEQ_NO),
            value: Vec::new(),
            rec_type: RecordType::Tombstone,
        };
        let pos = {
            let mut files = self.files.write();
            self.append_record(&mut files, &record)?
        };
        // The tombstone itself is dead weight the moment it lands.
        self.reclaim_size.fetch_add(pos.size as u64, Ordering::Relaxed);

        let (old, existed) = self.index.delete(key)?;
        if !existed {
            return Err(Error::IndexUpdateFailed);
        }
        if let Some(old) = old {
            self.reclaim_size.fetch_add(old.size as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Appends one encoded record to the active file, rolling over first if
    /// the record would push it past the size limit. Caller holds the write
    /// lock on `files`.
    pub(crate) fn append_record(&self, files: &mut FileSet, record: &LogRecord) -> Result<Position> {
        if files.active.is_none() {
            files.active = Some(DataFile::open(&self.options.dir_path, 0, IoMode::Standard)?);
        }

        let (frame, size) = record.encode();

        let needs_rollover = match &files.active {
            Some(active) => active.write_off + size as i64 > self.options.data_file_size as i64,
            None => false,
        };
        if needs_rollover {
            self.rotate_active(files)?;
        }

        let active = match files.active.as_mut() {
            Some(active) => active,
            None => return Err(Error::DataFileNotFound),
        };
        let file_id = active.file_id;
        let offset = active.write_off;
        active.append(&frame)?;

        files.bytes_since_sync += size;
        let mut need_sync = self.options.sync_write;
        if !need_sync
            && self.options.bytes_per_sync > 0
            && files.bytes_since_sync >= self.options.bytes_per_sync
        {
            need_sync = true;
        }
        if need_sync {
            active.sync()?;
            files.bytes_since_sync = 0;
        }

        Ok(Position {
            file_id,
            offset,
            size: size as u32,
        })
    }

    /// Seals the active file and opens its successor. Caller holds the
    /// write lock on `files`.
    pub(crate) fn rotate_active(&self, files: &mut FileSet) -> Result<()> {
        if let Some(active) = files.active.take() {
            active.sync()?;
            let next_id = active.file_id + 1;
            files.older.insert(active.file_id, Arc::new(active));
            files.active = Some(DataFile::open(
                &self.options.dir_path,
                next_id,
                IoMode::Standard,
            )?);
        }
        Ok(())
    }
}
