//! Atomic write batches.
//!
//! A batch buffers puts and deletes in memory, then commits them in one
//! critical section: every record is appended under a fresh sequence
//! number, followed by a terminator record for that number. Recovery only
//! applies sequence-tagged records once it sees their terminator, so a
//! crash mid-commit discards the batch wholesale.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use logfile::record::{encode_key_with_seq, LogRecord, Position, RecordType};

use crate::error::{Error, Result};
use crate::{Engine, WriteBatchOptions};

/// Key of the terminator record that seals a committed batch.
pub(crate) const BATCH_FINISHED_KEY: &[u8] = b"txn-fin";

/// A buffered set of writes applied atomically by [`WriteBatch::commit`].
///
/// A batch holds at most one pending record per key: a later `put` or
/// `delete` of the same key replaces the earlier one. The buffer borrows
/// the engine, so a batch never outlives it.
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,
    pending: HashMap<Vec<u8>, LogRecord>,
}

impl Engine {
    /// Starts an empty batch.
    pub fn new_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch {
            engine: self,
            options,
            pending: HashMap::new(),
        }
    }
}

impl WriteBatch<'_> {
    /// Buffers a put. Nothing reaches disk until [`WriteBatch::commit`].
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        self.pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: value.to_vec(),
                rec_type: RecordType::Normal,
            },
        );
        Ok(())
    }

    /// Buffers a delete.
    ///
    /// Deleting a key the committed index does not hold writes nothing: if
    /// the batch buffered a put for it, that put is cancelled; otherwise
    /// the call is a no-op.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        if self.engine.index.get(key)?.is_none() {
            self.pending.remove(key);
            return Ok(());
        }
        self.pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: Vec::new(),
                rec_type: RecordType::Tombstone,
            },
        );
        Ok(())
    }

    /// Number of writes the batch currently buffers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Appends every buffered record under a fresh sequence number plus the
    /// terminator, then applies the batch to the key directory. All of it
    /// happens under the engine write lock, so commits serialize and the
    /// sequence numbers observed on disk match the append order.
    pub fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.pending.len() > self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }

        let mut files = self.engine.files.write();

        let seq = self.engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: HashMap<Vec<u8>, Position> =
            HashMap::with_capacity(self.pending.len());
        for (key, record) in &self.pending {
            let tagged = LogRecord {
                key: encode_key_with_seq(key, seq),
                value: record.value.clone(),
                rec_type: record.rec_type,
            };
            let pos = self.engine.append_record(&mut files, &tagged)?;
            positions.insert(key.clone(), pos);
        }

        // The terminator is the commit point: replay drops everything
        // tagged with `seq` unless this record made it to disk.
        let terminator = LogRecord {
            key: encode_key_with_seq(BATCH_FINISHED_KEY, seq),
            value: Vec::new(),
            rec_type: RecordType::BatchTerminator,
        };
        self.engine.append_record(&mut files, &terminator)?;

        if self.options.sync_writes {
            if let Some(active) = &files.active {
                active.sync()?;
            }
        }

        for (key, record) in &self.pending {
            let pos = match positions.get(key) {
                Some(pos) => *pos,
                None => continue,
            };
            let old = match record.rec_type {
                RecordType::Normal => self.engine.index.put(key, pos)?,
                RecordType::Tombstone => {
                    let (old, _) = self.engine.index.delete(key)?;
                    self.engine
                        .reclaim_size
                        .fetch_add(pos.size as u64, Ordering::Relaxed);
                    old
                }
                RecordType::BatchTerminator => None,
            };
            if let Some(old) = old {
                self.engine
                    .reclaim_size
                    .fetch_add(old.size as u64, Ordering::Relaxed);
            }
        }

        self.pending.clear();
        Ok(())
    }
}
