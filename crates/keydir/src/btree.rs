//! The default backend: `BTreeMap` behind a reader/writer lock.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use logfile::record::Position;

use crate::{IndexIterator, Indexer, Result, SnapshotIter};

/// In-memory B-tree key directory.
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, Position>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: &[u8], pos: Position) -> Result<Option<Position>> {
        Ok(self.tree.write().insert(key.to_vec(), pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.tree.read().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<Position>, bool)> {
        let old = self.tree.write().remove(key);
        let existed = old.is_some();
        Ok((old, existed))
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let entries: Vec<(Vec<u8>, Position)> = self
            .tree
            .read()
            .iter()
            .map(|(key, pos)| (key.clone(), *pos))
            .collect();
        Ok(Box::new(SnapshotIter::new(entries, reverse)))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
