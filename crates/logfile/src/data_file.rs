//! Data files: an [`IoManager`] bound to a numeric file id, with an append
//! cursor and random-access record reads. The hint file, the merge marker,
//! and the sequence-counter file reuse the same record format under fixed
//! names.

use std::path::{Path, PathBuf};

use crate::io::{FileIo, IoManager, IoMode, MmapIo};
use crate::record::{decode_header, verify_crc, LogRecord, Position, RecordType, HEADER_MAX};
use crate::{Error, Result};

/// Suffix of append-only data files.
pub const DATA_FILE_SUFFIX: &str = ".data";

/// Index-only log that accelerates post-merge recovery: each record maps a
/// user key to a packed [`Position`].
pub const HINT_FILE_NAME: &str = "hint-index";

/// Marker whose presence commits a finished merge; its single record holds
/// the first non-merged file id in decimal ASCII.
pub const MERGE_FINISHED_FILE_NAME: &str = "merge.finished";

/// Carries the committed sequence counter across restarts when the on-disk
/// index backend is in use.
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// On-disk name of the data file with the given id: nine zero-padded digits.
pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{:09}{}", file_id, DATA_FILE_SUFFIX))
}

/// One log file. Exactly one data file per directory is writable at a time;
/// the engine serializes all appends.
pub struct DataFile {
    pub file_id: u32,
    /// Offset at which the next append lands. Restored from a full scan (or
    /// the file size) when the file is reopened.
    pub write_off: i64,
    io: Box<dyn IoManager>,
}

impl DataFile {
    /// Opens (creating when missing) the data file with the given id.
    pub fn open(dir: &Path, file_id: u32, mode: IoMode) -> Result<Self> {
        Self::open_path(&data_file_path(dir, file_id), file_id, mode)
    }

    /// Opens the hint file in `dir`.
    pub fn open_hint(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(HINT_FILE_NAME), 0, IoMode::Standard)
    }

    /// Opens the merge-finished marker file in `dir`.
    pub fn open_merge_finished(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(MERGE_FINISHED_FILE_NAME), 0, IoMode::Standard)
    }

    /// Opens the sequence-counter file in `dir`.
    pub fn open_seq_no(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(SEQ_NO_FILE_NAME), 0, IoMode::Standard)
    }

    fn open_path(path: &Path, file_id: u32, mode: IoMode) -> Result<Self> {
        let io = new_io_manager(path, mode)?;
        Ok(Self { file_id, write_off: 0, io })
    }

    /// Appends an encoded frame, advancing the write cursor by the number of
    /// bytes written.
    pub fn append(&mut self, frame: &[u8]) -> Result<u64> {
        let n = self.io.write(frame)?;
        self.write_off += n as i64;
        Ok(n as u64)
    }

    /// Appends a hint entry mapping `key` to the packed `pos`.
    pub fn append_hint_record(&mut self, key: &[u8], pos: Position) -> Result<()> {
        let record = LogRecord {
            key: key.to_vec(),
            value: pos.encode(),
            rec_type: RecordType::Normal,
        };
        let (frame, _) = record.encode();
        self.append(&frame)?;
        Ok(())
    }

    /// Reads the record starting at `offset`, returning it together with its
    /// total encoded size so the caller can advance to the next record.
    ///
    /// `Ok(None)` marks a clean end of file: past the last byte, a zeroed
    /// header region, or a record with zero-length key and value.
    pub fn read_record(&self, offset: i64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset < 0 || offset as u64 >= file_size {
            return Ok(None);
        }

        // Headers are variable length; read at most HEADER_MAX, less when the
        // file ends sooner.
        let header_cap = HEADER_MAX.min((file_size - offset as u64) as usize);
        let mut header_buf = vec![0u8; header_cap];
        self.io.read_at(&mut header_buf, offset as u64)?;

        let (header, header_size) = match decode_header(&header_buf)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };
        if header.key_size == 0 && header.value_size == 0 {
            return Ok(None);
        }

        let mut kv = vec![0u8; header.key_size + header.value_size];
        let n = self.io.read_at(&mut kv, offset as u64 + header_size as u64)?;
        if n < kv.len() {
            return Err(Error::Corrupt);
        }
        let (key, value) = kv.split_at(header.key_size);
        verify_crc(&header, &header_buf[4..header_size], key, value)?;

        let record = LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            rec_type: header.rec_type,
        };
        let total = (header_size + header.key_size + header.value_size) as u64;
        Ok(Some((record, total)))
    }

    /// Forces appended data down to disk.
    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Current file size in bytes.
    pub fn size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Reopens the backing handle with a different IO backend. Used after an
    /// mmap-backed startup scan to return to writable standard IO.
    pub fn set_io_mode(&mut self, dir: &Path, mode: IoMode) -> Result<()> {
        self.io = new_io_manager(&data_file_path(dir, self.file_id), mode)?;
        Ok(())
    }
}

fn new_io_manager(path: &Path, mode: IoMode) -> Result<Box<dyn IoManager>> {
    match mode {
        IoMode::Standard => Ok(Box::new(FileIo::open(path)?)),
        IoMode::Mmap => Ok(Box::new(MmapIo::open(path)?)),
    }
}
