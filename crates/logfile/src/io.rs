//! IO managers: one open file abstracted as positioned reads plus append
//! writes. Two backends: standard file IO for normal operation, and a
//! read-only memory map that speeds up the sequential startup scan.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;

use crate::{Error, Result};

/// Which backend a data file reads and writes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Standard file IO: positioned reads, append-only writes.
    Standard,
    /// Read-only memory map. Only valid while scanning existing files at
    /// startup; the engine reopens every file as [`IoMode::Standard`]
    /// before accepting writes.
    Mmap,
}

/// A single file as the log layer sees it.
///
/// Implementations must support concurrent positioned reads through `&self`;
/// writes are serialized by the caller.
pub trait IoManager: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`, returning the number read.
    /// Reads past the end of the file return `0`.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Appends `buf` in full, returning the number of bytes written.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Forces written data down to the device (fsync).
    fn sync(&self) -> Result<()>;

    /// Current size of the file in bytes.
    fn size(&self) -> Result<u64>;
}

/// Standard file IO backend.
pub struct FileIo {
    file: File,
}

impl FileIo {
    /// Opens `path` for reading and appending, creating it with mode 0644
    /// when missing.
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.create(true).read(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o644);
        }
        Ok(Self { file: opts.open(path)? })
    }
}

impl IoManager for FileIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }
        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            Ok(self.file.seek_read(buf, offset)?)
        }
        #[cfg(not(any(unix, windows)))]
        {
            let _ = (buf, offset);
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "positioned reads are not supported on this platform",
            )))
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        // write_all surfaces a short write as WriteZero.
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// Read-only memory-mapped backend.
pub struct MmapIo {
    // None when the file is empty: zero-length maps are rejected by the OS.
    map: Option<Mmap>,
    len: u64,
}

impl MmapIo {
    /// Maps `path` read-only, creating the file when missing so that open
    /// behaves the same as [`FileIo::open`].
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // Safety: the engine holds the directory lock for the lifetime of
            // the open instance, and maps are dropped before any reopen for
            // writing, so the underlying file cannot change under the map.
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map, len })
    }
}

impl IoManager for MmapIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data: &[u8] = match &self.map {
            Some(map) => map,
            None => return Ok(0),
        };
        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let offset = offset as usize;
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::ReadOnly)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.len)
    }
}
