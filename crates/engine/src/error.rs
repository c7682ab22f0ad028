//! The public error surface of the engine.

use thiserror::Error;

/// An engine `Result`.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything an engine call can fail with.
#[derive(Debug, Error)]
pub enum Error {
    /// An empty key was passed to a write or read.
    #[error("the key is empty")]
    KeyEmpty,

    /// The key has no live value (missing or tombstoned).
    #[error("key not found in database")]
    KeyNotFound,

    /// The key directory rejected an update it should have accepted.
    #[error("failed to update index")]
    IndexUpdateFailed,

    /// A position referenced a data file the engine does not hold.
    #[error("data file not found")]
    DataFileNotFound,

    /// Recovery hit an undecodable record or a malformed file name.
    #[error("the database directory may be corrupted")]
    DataDirectoryCorrupted,

    /// A batch holds more pending writes than its configured maximum.
    #[error("batch exceeds the max batch num")]
    ExceedMaxBatchNum,

    /// Another merge is already running on this engine.
    #[error("merge is in progress, try again later")]
    MergeInProgress,

    /// Another process holds the directory lock.
    #[error("the database directory is in use by another process")]
    DatabaseInUse,

    /// Reclaimable space has not reached the configured merge ratio.
    #[error("the merge ratio has not been reached")]
    MergeRatioUnreached,

    /// The volume lacks room to rewrite the live data set.
    #[error("not enough disk space for merge")]
    NoEnoughSpaceForMerge,

    /// Option validation failed at open.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// A log-layer failure outside the open path.
    #[error(transparent)]
    Storage(#[from] logfile::Error),

    /// A key-directory failure.
    #[error(transparent)]
    Index(#[from] keydir::Error),

    /// A bare OS error (directory walks, renames, the lock file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remaps log-layer corruption found while opening: a bad record during
/// recovery means the directory as a whole cannot be trusted.
pub(crate) fn open_err(err: logfile::Error) -> Error {
    match err {
        logfile::Error::Corrupt => Error::DataDirectoryCorrupted,
        other => Error::Storage(other),
    }
}
