use super::helpers::{open_engine, test_key, test_options};
use crate::{Engine, Error, IndexType, Options};
use tempfile::tempdir;

// --------------------- get edge cases ---------------------

#[test]
fn get_missing_key() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    assert!(matches!(engine.get(b"nope"), Err(Error::KeyNotFound)));
}

#[test]
fn get_rejects_empty_key() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    assert!(matches!(engine.get(b""), Err(Error::KeyEmpty)));
}

#[test]
fn get_reads_from_older_files() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(Options {
        data_file_size: 4 * 1024,
        ..test_options(dir.path())
    })
    .unwrap();

    engine.put(b"early", b"bird").unwrap();
    // Push enough data to roll the active file over.
    for i in 0..100 {
        engine.put(&test_key(i), &[b'x'; 256]).unwrap();
    }
    assert_eq!(engine.get(b"early").unwrap(), b"bird");
}

// --------------------- list_keys / fold ---------------------

#[test]
fn list_keys_is_sorted_and_complete() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    for i in (0..50).rev() {
        engine.put(&test_key(i), b"v").unwrap();
    }
    engine.delete(&test_key(25)).unwrap();

    let keys = engine.list_keys().unwrap();
    assert_eq!(keys.len(), 49);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    assert!(!keys.contains(&test_key(25)));
}

#[test]
fn list_keys_on_empty_engine() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    assert!(engine.list_keys().unwrap().is_empty());
}

#[test]
fn fold_visits_live_pairs_in_order() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    for i in 0..10 {
        engine.put(&test_key(i), format!("v{}", i).as_bytes()).unwrap();
    }
    engine.delete(&test_key(3)).unwrap();

    let mut seen = Vec::new();
    engine
        .fold(|key, value| {
            seen.push((key.to_vec(), value));
            true
        })
        .unwrap();

    assert_eq!(seen.len(), 9);
    assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(seen[3], (test_key(4), b"v4".to_vec()));
}

#[test]
fn fold_stops_when_callback_returns_false() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    for i in 0..10 {
        engine.put(&test_key(i), b"v").unwrap();
    }

    let mut visited = 0;
    engine
        .fold(|_, _| {
            visited += 1;
            visited < 4
        })
        .unwrap();
    assert_eq!(visited, 4);
}

// --------------------- stat ---------------------

#[test]
fn stat_reports_counts_and_sizes() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    for i in 0..20 {
        engine.put(&test_key(i), b"value").unwrap();
    }
    let stat = engine.stat().unwrap();
    assert_eq!(stat.key_num, 20);
    assert_eq!(stat.data_file_num, 1);
    assert!(stat.disk_size > 0);
}

// --------------------- alternate index backends ---------------------

#[test]
fn art_backend_roundtrip() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(Options {
        index_type: IndexType::Art,
        ..test_options(dir.path())
    })
    .unwrap();

    for i in 0..100 {
        engine.put(&test_key(i), &test_key(i)).unwrap();
    }
    engine.delete(&test_key(50)).unwrap();

    assert_eq!(engine.get(&test_key(7)).unwrap(), test_key(7));
    assert!(matches!(engine.get(&test_key(50)), Err(Error::KeyNotFound)));
    assert_eq!(engine.list_keys().unwrap().len(), 99);
}

#[test]
fn bptree_backend_roundtrip() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(Options {
        index_type: IndexType::BPlusTree,
        ..test_options(dir.path())
    })
    .unwrap();

    for i in 0..100 {
        engine.put(&test_key(i), &test_key(i)).unwrap();
    }
    engine.delete(&test_key(50)).unwrap();

    assert_eq!(engine.get(&test_key(7)).unwrap(), test_key(7));
    assert!(matches!(engine.get(&test_key(50)), Err(Error::KeyNotFound)));
    assert_eq!(engine.list_keys().unwrap().len(), 99);
}
