//! Read path: `get`, `list_keys`, `fold`, and positioned value fetches.
//!
//! A read is one key-directory lookup followed by one positioned read from
//! the file the returned position names. Readers share the file lock;
//! appends to the active file never move existing bytes, so concurrent
//! reads at recorded positions are safe.

use logfile::record::{Position, RecordType};

use crate::error::{Error, Result};
use crate::{Engine, FileSet};

impl Engine {
    /// Returns the live value of `key`.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` when the key is absent or tombstoned; `KeyEmpty` for
    /// an empty key.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let files = self.files.read();
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        let pos = match self.index.get(key)? {
            Some(pos) => pos,
            None => return Err(Error::KeyNotFound),
        };
        self.value_at(&files, pos)
    }

    /// Every live key, in unsigned lexicographic order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut iter = self.index.iterator(false)?;
        let mut keys = Vec::with_capacity(self.index.len());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        Ok(keys)
    }

    /// Calls `f` with every live key/value pair in ascending key order,
    /// stopping early when `f` returns `false`.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], Vec<u8>) -> bool,
    {
        let files = self.files.read();
        let mut iter = self.index.iterator(false)?;
        while iter.valid() {
            let value = self.value_at(&files, iter.position())?;
            if !f(iter.key(), value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Reads the value a directory position points at. Caller holds the
    /// file lock in either mode.
    pub(crate) fn value_at(&self, files: &FileSet, pos: Position) -> Result<Vec<u8>> {
        let is_active = files
            .active
            .as_ref()
            .map(|active| active.file_id == pos.file_id)
            .unwrap_or(false);

        let read = if is_active {
            match &files.active {
                Some(active) => active.read_record(pos.offset)?,
                None => return Err(Error::DataFileNotFound),
            }
        } else {
            match files.older.get(&pos.file_id) {
                Some(file) => file.read_record(pos.offset)?,
                None => return Err(Error::DataFileNotFound),
            }
        };

        match read {
            // The directory never points past the end of a file; hitting
            // EOF here means the directory and the log disagree.
            None => Err(Error::DataDirectoryCorrupted),
            Some((record, _)) => {
                if record.rec_type == RecordType::Tombstone {
                    return Err(Error::KeyNotFound);
                }
                Ok(record.value)
            }
        }
    }
}
