//! # logfile — the append-only record log
//!
//! Provides the durable layer of the CinderKV storage engine: a set of
//! numbered data files to which encoded records are only ever appended.
//! Everything above this crate (the key directory, batches, merge) treats
//! the log as the single source of truth; a value is only real if a record
//! for it decodes here.
//!
//! ## Binary Record Format
//!
//! ```text
//! [crc32: u32 LE][type: u8][key_size: svarint][value_size: svarint][key][value]
//! ```
//!
//! `type` is 0 (normal), 1 (tombstone) or 2 (batch terminator). The two
//! lengths are zig-zag signed varints of at most five bytes each, so the
//! header occupies between 7 and [`record::HEADER_MAX`] bytes. The CRC
//! covers every byte after the CRC field itself.
//!
//! Record keys carry an unsigned-varint sequence-number prefix (`0` for
//! plain writes); see [`record::encode_key_with_seq`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use logfile::{DataFile, IoMode};
//! use logfile::record::{LogRecord, RecordType};
//!
//! let mut file = DataFile::open("/tmp/db".as_ref(), 0, IoMode::Standard).unwrap();
//! let (frame, _) = LogRecord {
//!     key: b"hello".to_vec(),
//!     value: b"world".to_vec(),
//!     rec_type: RecordType::Normal,
//! }
//! .encode();
//! file.append(&frame).unwrap();
//!
//! let (record, _) = file.read_record(0).unwrap().unwrap();
//! assert_eq!(record.value, b"world");
//! ```

pub mod data_file;
pub mod io;
pub mod record;

pub use data_file::{
    data_file_path, DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME,
    SEQ_NO_FILE_NAME,
};
pub use io::{FileIo, IoManager, IoMode, MmapIo};
pub use record::{LogRecord, Position, RecordType};

use thiserror::Error;

/// Errors produced by the log layer.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A record failed CRC validation or carried a malformed header.
    #[error("corrupt record")]
    Corrupt,

    /// A write was attempted through the read-only mmap backend.
    #[error("io backend is read-only")]
    ReadOnly,
}

/// A log-layer `Result`.
pub type Result<T> = std::result::Result<T, Error>;
