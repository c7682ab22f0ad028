use super::helpers::{open_engine, test_key};
use crate::{Error, WriteBatchOptions};
use logfile::record::{encode_key_with_seq, LogRecord, RecordType};
use logfile::data_file_path;
use tempfile::tempdir;

/// Encoded size of the terminator record sealing batch `seq`.
fn terminator_len(seq: u64) -> u64 {
    let (_, size) = LogRecord {
        key: encode_key_with_seq(b"txn-fin", seq),
        value: Vec::new(),
        rec_type: RecordType::BatchTerminator,
    }
    .encode();
    size
}

// --------------------- Commit visibility ---------------------

#[test]
fn committed_batch_is_visible() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(WriteBatchOptions::default());
    batch.put(b"a", b"1").unwrap();
    batch.put(b"b", b"2").unwrap();
    batch.commit().unwrap();

    assert_eq!(engine.get(b"a").unwrap(), b"1");
    assert_eq!(engine.get(b"b").unwrap(), b"2");
}

#[test]
fn uncommitted_batch_is_invisible() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(WriteBatchOptions::default());
    batch.put(b"a", b"1").unwrap();

    assert!(matches!(engine.get(b"a"), Err(Error::KeyNotFound)));
}

#[test]
fn empty_commit_is_a_noop() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(WriteBatchOptions::default());
    batch.commit().unwrap();
    assert_eq!(engine.stat().unwrap().data_file_num, 0);
}

#[test]
fn batch_buffers_last_write_per_key() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(WriteBatchOptions::default());
    batch.put(b"k", b"v1").unwrap();
    batch.put(b"k", b"v2").unwrap();
    assert_eq!(batch.len(), 1);
    batch.commit().unwrap();

    assert_eq!(engine.get(b"k").unwrap(), b"v2");
}

#[test]
fn commit_reuses_batch() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(WriteBatchOptions::default());
    batch.put(b"a", b"1").unwrap();
    batch.commit().unwrap();
    assert!(batch.is_empty());

    batch.put(b"b", b"2").unwrap();
    batch.commit().unwrap();

    assert_eq!(engine.get(b"a").unwrap(), b"1");
    assert_eq!(engine.get(b"b").unwrap(), b"2");
}

// --------------------- Size limit ---------------------

#[test]
fn oversized_batch_is_rejected() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(WriteBatchOptions {
        max_batch_num: 3,
        sync_writes: false,
    });
    for i in 0..4 {
        batch.put(&test_key(i), b"v").unwrap();
    }
    assert!(matches!(batch.commit(), Err(Error::ExceedMaxBatchNum)));

    // Nothing leaked to disk or the index.
    assert!(matches!(engine.get(&test_key(0)), Err(Error::KeyNotFound)));
}

#[test]
fn empty_key_is_rejected_in_batch() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(WriteBatchOptions::default());
    assert!(matches!(batch.put(b"", b"v"), Err(Error::KeyEmpty)));
    assert!(matches!(batch.delete(b""), Err(Error::KeyEmpty)));
}

// --------------------- Delete semantics ---------------------

#[test]
fn batch_delete_of_committed_key() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    engine.put(b"b", b"prior").unwrap();

    let mut batch = engine.new_batch(WriteBatchOptions::default());
    batch.delete(b"b").unwrap();
    batch.commit().unwrap();

    assert!(matches!(engine.get(b"b"), Err(Error::KeyNotFound)));
}

#[test]
fn batch_delete_cancels_pending_put() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    // The key exists only inside the batch buffer; the delete cancels the
    // put instead of writing a tombstone.
    let mut batch = engine.new_batch(WriteBatchOptions::default());
    batch.put(b"ghost", b"v").unwrap();
    batch.delete(b"ghost").unwrap();
    assert!(batch.is_empty());
    batch.commit().unwrap();

    assert!(matches!(engine.get(b"ghost"), Err(Error::KeyNotFound)));
    assert_eq!(engine.stat().unwrap().data_file_num, 0);
}

#[test]
fn batch_delete_of_unknown_key_is_a_noop() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(WriteBatchOptions::default());
    batch.delete(b"unknown").unwrap();
    assert!(batch.is_empty());
    batch.commit().unwrap();
}

#[test]
fn batch_put_then_delete_of_committed_key_tombstones() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    engine.put(b"k", b"old").unwrap();

    let mut batch = engine.new_batch(WriteBatchOptions::default());
    batch.put(b"k", b"new").unwrap();
    batch.delete(b"k").unwrap();
    batch.commit().unwrap();

    assert!(matches!(engine.get(b"k"), Err(Error::KeyNotFound)));
}

// --------------------- Crash boundaries ---------------------

#[test]
fn batch_without_terminator_is_discarded_on_reopen() {
    let dir = tempdir().unwrap();
    {
        let engine = open_engine(dir.path());
        engine.put(b"b", b"prior").unwrap();

        let mut batch = engine.new_batch(WriteBatchOptions::default());
        batch.put(b"a", b"1").unwrap();
        batch.delete(b"b").unwrap();
        batch.put(b"c", b"3").unwrap();
        batch.commit().unwrap();
        engine.close().unwrap();
    }

    // Chop the terminator off the log, as if the process died between the
    // batch records and the commit record.
    let path = data_file_path(dir.path(), 0);
    let len = std::fs::metadata(&path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - terminator_len(1)).unwrap();

    let engine = open_engine(dir.path());
    assert!(matches!(engine.get(b"a"), Err(Error::KeyNotFound)));
    assert!(matches!(engine.get(b"c"), Err(Error::KeyNotFound)));
    assert_eq!(engine.get(b"b").unwrap(), b"prior");
}

#[test]
fn batch_with_terminator_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let engine = open_engine(dir.path());
        engine.put(b"b", b"prior").unwrap();

        let mut batch = engine.new_batch(WriteBatchOptions::default());
        batch.put(b"a", b"1").unwrap();
        batch.delete(b"b").unwrap();
        batch.put(b"c", b"3").unwrap();
        batch.commit().unwrap();
        engine.close().unwrap();
    }

    let engine = open_engine(dir.path());
    assert_eq!(engine.get(b"a").unwrap(), b"1");
    assert_eq!(engine.get(b"c").unwrap(), b"3");
    assert!(matches!(engine.get(b"b"), Err(Error::KeyNotFound)));
}

#[test]
fn sequence_numbers_survive_reopen() {
    let dir = tempdir().unwrap();
    {
        let engine = open_engine(dir.path());
        for round in 0..3 {
            let mut batch = engine.new_batch(WriteBatchOptions::default());
            batch.put(&test_key(round), b"v").unwrap();
            batch.commit().unwrap();
        }
        engine.close().unwrap();
    }

    // A batch committed after reopen must land beyond the replayed maximum
    // sequence number, or replay order would be ambiguous.
    let engine = open_engine(dir.path());
    let mut batch = engine.new_batch(WriteBatchOptions::default());
    batch.put(&test_key(99), b"v").unwrap();
    batch.commit().unwrap();
    engine.close().unwrap();

    let engine = open_engine(dir.path());
    assert_eq!(engine.list_keys().unwrap().len(), 4);
}
