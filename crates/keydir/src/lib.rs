//! # keydir — the ordered key directory
//!
//! Maps every live user key to the [`Position`] of its most recent record.
//! The directory is the engine's source of truth: a value on disk is only
//! visible if a position in here points at it.
//!
//! Three interchangeable backends implement the same [`Indexer`] contract:
//!
//! | Backend            | Storage  | Notes                                   |
//! |--------------------|----------|-----------------------------------------|
//! | [`BTreeIndex`]     | memory   | default; `BTreeMap` behind an `RwLock`  |
//! | [`ArtIndex`]       | memory   | adaptive radix tree; fast on shared-prefix key sets |
//! | [`BPlusTreeIndex`] | disk     | copy-on-write B+ tree; survives restarts, so the engine skips log replay |
//!
//! Keys order by unsigned byte-wise comparison. Iterators materialize a
//! snapshot at construction — the engine serializes writers while one is
//! being built, so the snapshot is consistent.

pub mod art;
pub mod bptree;
pub mod btree;

use std::path::Path;

use thiserror::Error;

use logfile::record::Position;

pub use art::ArtIndex;
pub use bptree::{BPlusTreeIndex, BPTREE_INDEX_FILE_NAME};
pub use btree::BTreeIndex;

/// Errors produced by the key directory.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error from the on-disk backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk index file failed validation.
    #[error("index file corrupt: {0}")]
    Corrupt(String),

    /// A stored position failed to unpack.
    #[error(transparent)]
    Record(#[from] logfile::Error),
}

/// A key-directory `Result`.
pub type Result<T> = std::result::Result<T, Error>;

/// Which ordered map backs the key directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// In-memory B-tree.
    BTree,
    /// In-memory adaptive radix tree.
    Art,
    /// On-disk copy-on-write B+ tree.
    BPlusTree,
}

/// Ordered mapping from user key to record position.
///
/// Implementations synchronize internally; the engine calls through `&self`
/// from both its read and write paths.
pub trait Indexer: Send + Sync {
    /// Inserts or overwrites, returning the previous position when one
    /// existed so the caller can account the superseded record's bytes.
    fn put(&self, key: &[u8], pos: Position) -> Result<Option<Position>>;

    /// Looks up the position of `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Position>>;

    /// Removes `key`. Returns the removed position and whether a mapping
    /// existed; deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(Option<Position>, bool)>;

    /// Number of live keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot cursor over the directory in unsigned byte order.
    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>>;

    /// Forces a persistent backend down to disk; no-op for in-memory ones.
    fn sync(&self) -> Result<()>;

    /// Releases backend resources; no-op for in-memory backends.
    fn close(&self) -> Result<()>;
}

/// Ordered cursor over a directory snapshot.
///
/// `key` and `position` require `valid()`; callers check before access.
pub trait IndexIterator: Send {
    /// Repositions on the first entry in traversal order.
    fn rewind(&mut self);

    /// Positions on the first key `>=` the probe (`<=` when reversed).
    fn seek(&mut self, key: &[u8]);

    /// Advances one entry in traversal order.
    fn next(&mut self);

    /// Whether the cursor points at an entry.
    fn valid(&self) -> bool;

    /// Key at the cursor.
    fn key(&self) -> &[u8];

    /// Position at the cursor.
    fn position(&self) -> Position;
}

/// Builds the configured backend. `dir` and `sync_writes` only matter for
/// the on-disk B+ tree.
pub fn new_indexer(kind: IndexType, dir: &Path, sync_writes: bool) -> Result<Box<dyn Indexer>> {
    match kind {
        IndexType::BTree => Ok(Box::new(BTreeIndex::new())),
        IndexType::Art => Ok(Box::new(ArtIndex::new())),
        IndexType::BPlusTree => Ok(Box::new(BPlusTreeIndex::open(dir, sync_writes)?)),
    }
}

/// Materialized snapshot cursor shared by every backend.
pub(crate) struct SnapshotIter {
    /// Sorted ascending by key.
    entries: Vec<(Vec<u8>, Position)>,
    reverse: bool,
    cursor: usize,
}

impl SnapshotIter {
    pub(crate) fn new(entries: Vec<(Vec<u8>, Position)>, reverse: bool) -> Self {
        Self {
            entries,
            reverse,
            cursor: 0,
        }
    }

    fn index(&self) -> usize {
        if self.reverse {
            self.entries.len() - 1 - self.cursor
        } else {
            self.cursor
        }
    }
}

impl IndexIterator for SnapshotIter {
    fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        if self.reverse {
            // First entry in descending order whose key is <= the probe.
            let at_or_below = self.entries.partition_point(|(k, _)| k.as_slice() <= key);
            self.cursor = self.entries.len() - at_or_below;
        } else {
            self.cursor = self.entries.partition_point(|(k, _)| k.as_slice() < key);
        }
    }

    fn next(&mut self) {
        self.cursor += 1;
    }

    fn valid(&self) -> bool {
        self.cursor < self.entries.len()
    }

    fn key(&self) -> &[u8] {
        let idx = self.index();
        &self.entries[idx].0
    }

    fn position(&self) -> Position {
        let idx = self.index();
        self.entries[idx].1
    }
}

#[cfg(test)]
mod tests;
