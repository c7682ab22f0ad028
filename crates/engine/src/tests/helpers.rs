use std::path::Path;

use rand::Rng;

use crate::{Engine, Options};

/// Options tuned for tests: real defaults except the directory.
pub fn test_options(dir: &Path) -> Options {
    Options {
        dir_path: dir.to_path_buf(),
        ..Options::default()
    }
}

pub fn open_engine(dir: &Path) -> Engine {
    Engine::open(test_options(dir)).unwrap()
}

/// Deterministic, zero-padded test key.
pub fn test_key(i: usize) -> Vec<u8> {
    format!("cinderkv-key-{:09}", i).into_bytes()
}

/// Random value of `n` bytes.
pub fn test_value(n: usize) -> Vec<u8> {
    let mut value = vec![0u8; n];
    rand::thread_rng().fill(&mut value[..]);
    value
}

/// Count of `*.data` files in `dir`.
pub fn count_data_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .ends_with(logfile::DATA_FILE_SUFFIX)
        })
        .count()
}
