//! Small filesystem probes used by `stat` and the merge gates.

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Total size in bytes of every file under `dir`, recursively.
pub(crate) fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Free bytes on the volume holding `dir`.
pub(crate) fn available_space(dir: &Path) -> Result<u64> {
    Ok(fs2::available_space(dir)?)
}
