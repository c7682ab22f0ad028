//! The user-facing ordered cursor.
//!
//! Wraps an index-iterator snapshot and fetches values on demand through
//! the engine. The prefix filter skips non-matching keys in whichever
//! direction the cursor travels, so a reverse scan with a prefix
//! terminates at the front of the snapshot like a forward scan does at
//! the back.

use keydir::IndexIterator;

use crate::error::Result;
use crate::{Engine, IteratorOptions};

/// Ordered cursor over the live key set.
///
/// `key` requires a valid cursor; callers check [`Iter::valid`] first.
pub struct Iter<'a> {
    engine: &'a Engine,
    index_iter: Box<dyn IndexIterator>,
    options: IteratorOptions,
}

impl Engine {
    /// Builds a cursor positioned on the first matching entry.
    pub fn new_iterator(&self, options: IteratorOptions) -> Result<Iter<'_>> {
        let index_iter = self.index.iterator(options.reverse)?;
        let mut iter = Iter {
            engine: self,
            index_iter,
            options,
        };
        iter.skip_to_prefix();
        Ok(iter)
    }
}

impl Iter<'_> {
    /// Repositions on the first matching entry.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_prefix();
    }

    /// Positions on the first matching key `>=` the probe (`<=` when the
    /// cursor is reversed).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_prefix();
    }

    /// Advances to the next matching entry.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_prefix();
    }

    /// Whether the cursor points at an entry.
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Key at the cursor.
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Fetches the value at the cursor from its data file.
    pub fn value(&self) -> Result<Vec<u8>> {
        let pos = self.index_iter.position();
        let files = self.engine.files.read();
        self.engine.value_at(&files, pos)
    }

    /// Advances past keys outside the prefix, in the traversal direction.
    fn skip_to_prefix(&mut self) {
        if self.options.prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() && !self.index_iter.key().starts_with(&self.options.prefix) {
            self.index_iter.next();
        }
    }
}
