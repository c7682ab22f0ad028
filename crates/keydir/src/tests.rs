use super::*;
use logfile::record::Position;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn pos(file_id: u32, offset: i64) -> Position {
    Position {
        file_id,
        offset,
        size: 24,
    }
}

fn key(i: u32) -> Vec<u8> {
    format!("key-{:05}", i).into_bytes()
}

/// Runs the shared contract checks against one backend.
fn check_indexer_contract(index: &dyn Indexer) {
    assert_eq!(index.len(), 0);
    assert!(index.get(b"missing").unwrap().is_none());

    // Insert returns None, overwrite returns the old position.
    assert!(index.put(b"a", pos(1, 0)).unwrap().is_none());
    assert!(index.put(b"b", pos(1, 24)).unwrap().is_none());
    assert_eq!(index.put(b"a", pos(2, 0)).unwrap(), Some(pos(1, 0)));
    assert_eq!(index.len(), 2);

    assert_eq!(index.get(b"a").unwrap(), Some(pos(2, 0)));
    assert_eq!(index.get(b"b").unwrap(), Some(pos(1, 24)));

    // Delete reports the removed position; deleting again is a no-op.
    let (old, existed) = index.delete(b"a").unwrap();
    assert_eq!(old, Some(pos(2, 0)));
    assert!(existed);
    let (old, existed) = index.delete(b"a").unwrap();
    assert!(old.is_none());
    assert!(!existed);
    assert_eq!(index.len(), 1);
}

fn fill(index: &dyn Indexer, n: u32) {
    for i in 0..n {
        index.put(&key(i), pos(0, i as i64 * 24)).unwrap();
    }
}

fn drain_keys(iter: &mut dyn IndexIterator) -> Vec<Vec<u8>> {
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    keys
}

// -------------------- Shared contract --------------------

#[test]
fn btree_contract() {
    check_indexer_contract(&BTreeIndex::new());
}

#[test]
fn art_contract() {
    check_indexer_contract(&ArtIndex::new());
}

#[test]
fn bptree_contract() {
    let dir = tempdir().unwrap();
    let index = BPlusTreeIndex::open(dir.path(), false).unwrap();
    check_indexer_contract(&index);
}

// -------------------- Iterator ordering --------------------

#[test]
fn iterator_is_sorted_per_backend() {
    let dir = tempdir().unwrap();
    let backends: Vec<Box<dyn Indexer>> = vec![
        Box::new(BTreeIndex::new()),
        Box::new(ArtIndex::new()),
        Box::new(BPlusTreeIndex::open(dir.path(), false).unwrap()),
    ];

    // Insert in a scrambled order; expect unsigned lexicographic output.
    let mut inserted: Vec<Vec<u8>> = (0..200u32).map(key).collect();
    inserted.push(vec![0x00]);
    inserted.push(vec![0xFF]);
    inserted.push(vec![0x00, 0x01]);
    inserted.push(b"key-".to_vec());

    for index in &backends {
        for (i, k) in inserted.iter().rev().enumerate() {
            index.put(k, pos(0, i as i64)).unwrap();
        }

        let mut expected = inserted.clone();
        expected.sort();

        let mut iter = index.iterator(false).unwrap();
        assert_eq!(drain_keys(iter.as_mut()), expected);

        let mut iter = index.iterator(true).unwrap();
        expected.reverse();
        assert_eq!(drain_keys(iter.as_mut()), expected);
    }
}

#[test]
fn iterator_seek_forward_and_reverse() {
    let index = BTreeIndex::new();
    for k in [b"aa".as_slice(), b"bb", b"cc", b"dd"] {
        index.put(k, pos(0, 0)).unwrap();
    }

    let mut iter = index.iterator(false).unwrap();
    iter.seek(b"bb");
    assert_eq!(iter.key(), b"bb");
    iter.seek(b"bc");
    assert_eq!(iter.key(), b"cc");
    iter.seek(b"zz");
    assert!(!iter.valid());

    let mut iter = index.iterator(true).unwrap();
    iter.seek(b"bc");
    assert_eq!(iter.key(), b"bb");
    iter.next();
    assert_eq!(iter.key(), b"aa");
    iter.seek(b"a");
    assert!(!iter.valid());
}

#[test]
fn iterator_rewind_restarts() {
    let index = ArtIndex::new();
    fill(&index, 5);

    let mut iter = index.iterator(false).unwrap();
    iter.next();
    iter.next();
    iter.rewind();
    assert_eq!(iter.key(), key(0).as_slice());
}

#[test]
fn iterator_is_a_snapshot() {
    let index = BTreeIndex::new();
    fill(&index, 3);

    let mut iter = index.iterator(false).unwrap();
    index.put(&key(100), pos(0, 0)).unwrap();
    index.delete(&key(0)).unwrap();

    // The cursor still sees the state at construction time.
    assert_eq!(drain_keys(iter.as_mut()).len(), 3);
}

// -------------------- ART specifics --------------------

#[test]
fn art_shared_prefix_keys() {
    let index = ArtIndex::new();
    let keys: Vec<&[u8]> = vec![
        b"app", b"apple", b"application", b"apply", b"banana", b"band", b"b",
    ];
    for (i, k) in keys.iter().enumerate() {
        index.put(k, pos(0, i as i64)).unwrap();
    }
    assert_eq!(index.len(), keys.len());
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(index.get(k).unwrap(), Some(pos(0, i as i64)), "key {:?}", k);
    }

    // A prefix of a stored key is not itself stored.
    assert!(index.get(b"appl").unwrap().is_none());
    assert!(index.get(b"ba").unwrap().is_none());

    let mut iter = index.iterator(false).unwrap();
    let mut expected: Vec<Vec<u8>> = keys.iter().map(|k| k.to_vec()).collect();
    expected.sort();
    assert_eq!(drain_keys(iter.as_mut()), expected);
}

#[test]
fn art_grows_through_node_classes() {
    let index = ArtIndex::new();
    // 256 distinct first bytes under a shared root forces Node4 -> Node256.
    for b in 0..=255u8 {
        index.put(&[b'p', b], pos(0, b as i64)).unwrap();
    }
    assert_eq!(index.len(), 256);
    for b in 0..=255u8 {
        assert_eq!(index.get(&[b'p', b]).unwrap(), Some(pos(0, b as i64)));
    }

    let mut iter = index.iterator(false).unwrap();
    let keys = drain_keys(iter.as_mut());
    assert_eq!(keys.len(), 256);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn art_delete_prunes_and_preserves_siblings() {
    let index = ArtIndex::new();
    index.put(b"roam", pos(0, 0)).unwrap();
    index.put(b"root", pos(0, 1)).unwrap();
    index.put(b"ro", pos(0, 2)).unwrap();

    index.delete(b"roam").unwrap();
    assert!(index.get(b"roam").unwrap().is_none());
    assert_eq!(index.get(b"root").unwrap(), Some(pos(0, 1)));
    assert_eq!(index.get(b"ro").unwrap(), Some(pos(0, 2)));
    assert_eq!(index.len(), 2);

    index.delete(b"ro").unwrap();
    index.delete(b"root").unwrap();
    assert_eq!(index.len(), 0);
    let mut iter = index.iterator(false).unwrap();
    assert!(drain_keys(iter.as_mut()).is_empty());
}

// -------------------- B+ tree specifics --------------------

#[test]
fn bptree_persists_across_reopen() {
    let dir = tempdir().unwrap();
    {
        let index = BPlusTreeIndex::open(dir.path(), false).unwrap();
        fill(&index, 500);
        index.delete(&key(123)).unwrap();
        index.close().unwrap();
    }

    let index = BPlusTreeIndex::open(dir.path(), false).unwrap();
    assert_eq!(index.len(), 499);
    assert!(index.get(&key(123)).unwrap().is_none());
    assert_eq!(index.get(&key(0)).unwrap(), Some(pos(0, 0)));
    assert_eq!(index.get(&key(499)).unwrap(), Some(pos(0, 499 * 24)));

    let mut iter = index.iterator(false).unwrap();
    let keys = drain_keys(iter.as_mut());
    assert_eq!(keys.len(), 499);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn bptree_splits_hold_under_scrambled_inserts() {
    let dir = tempdir().unwrap();
    let index = BPlusTreeIndex::open(dir.path(), false).unwrap();

    use rand::seq::SliceRandom;
    let mut order: Vec<u32> = (0..2_000).collect();
    order.shuffle(&mut rand::thread_rng());
    for &i in &order {
        index.put(&key(i), pos(1, i as i64)).unwrap();
    }

    assert_eq!(index.len(), 2_000);
    for i in (0..2_000).step_by(97) {
        assert_eq!(index.get(&key(i)).unwrap(), Some(pos(1, i as i64)));
    }
}

#[test]
fn bptree_insert_below_lowest_key_routes_correctly() {
    let dir = tempdir().unwrap();
    let index = BPlusTreeIndex::open(dir.path(), false).unwrap();
    // Enough entries for at least one split, then a new global minimum.
    for i in 100..400u32 {
        index.put(&key(i), pos(0, i as i64)).unwrap();
    }
    index.put(&key(1), pos(0, 1)).unwrap();
    assert_eq!(index.get(&key(1)).unwrap(), Some(pos(0, 1)));

    let mut iter = index.iterator(false).unwrap();
    assert_eq!(iter.key(), key(1).as_slice());
}

#[test]
fn bptree_delete_to_empty_and_reuse() {
    let dir = tempdir().unwrap();
    let index = BPlusTreeIndex::open(dir.path(), false).unwrap();
    fill(&index, 300);
    for i in 0..300u32 {
        let (_, existed) = index.delete(&key(i)).unwrap();
        assert!(existed, "key {} should exist", i);
    }
    assert_eq!(index.len(), 0);

    index.put(b"fresh", pos(9, 9)).unwrap();
    assert_eq!(index.get(b"fresh").unwrap(), Some(pos(9, 9)));
}

#[test]
fn bptree_empty_reopen_is_empty() {
    let dir = tempdir().unwrap();
    {
        let index = BPlusTreeIndex::open(dir.path(), true).unwrap();
        index.close().unwrap();
    }
    let index = BPlusTreeIndex::open(dir.path(), true).unwrap();
    assert_eq!(index.len(), 0);
    assert!(index.get(b"anything").unwrap().is_none());
}
