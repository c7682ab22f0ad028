//! On-disk B+ tree backend.
//!
//! A single-file, copy-on-write B+ tree stored in `bptree-index` inside the
//! data directory. Because the directory survives restarts, the engine skips
//! log replay entirely when this backend is selected.
//!
//! ## File layout
//!
//! ```text
//! [meta slot 0][meta slot 1][node][node][node]...
//! ```
//!
//! Nodes are only ever appended; a mutation rewrites the path from leaf to
//! root at the end of the file and then flips one of the two meta slots to
//! the new root. Whichever valid slot carries the higher transaction id wins
//! at open, so a torn update falls back to the previous root. Values in
//! leaves are packed [`Position`]s; branch entries route by the lowest key
//! of their subtree.
//!
//! Durability mirrors the engine's sync policy: with `sync_writes` every
//! mutation is fsynced (nodes before meta), otherwise data reaches disk on
//! [`Indexer::sync`] and close.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use parking_lot::Mutex;

use logfile::record::{Position, POSITION_PACKED_LEN};

use crate::{Error, IndexIterator, Indexer, Result, SnapshotIter};

/// Name of the index file inside the data directory.
pub const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";

const META_MAGIC: u32 = 0x4B44_4250;
const META_SLOT_SIZE: u64 = 64;
const META_LEN: usize = 40;
/// Node blocks start after the two meta slots.
const DATA_START: u64 = 2 * META_SLOT_SIZE;

const LEAF_TAG: u8 = 1;
const BRANCH_TAG: u8 = 2;

/// Entries per node before a split.
const MAX_NODE_ENTRIES: usize = 128;

/// Deserialized-node cache bound; the cache is rebuilt on demand.
const NODE_CACHE_LIMIT: usize = 4096;

/// On-disk B+ tree key directory.
pub struct BPlusTreeIndex {
    tree: Mutex<Tree>,
}

impl BPlusTreeIndex {
    /// Opens (creating when missing) the index file inside `dir`.
    pub fn open(dir: &Path, sync_writes: bool) -> Result<Self> {
        let path = dir.join(BPTREE_INDEX_FILE_NAME);
        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();

        let mut tree = Tree {
            file,
            sync_writes,
            txid: 0,
            root_off: DATA_START,
            used: DATA_START,
            key_count: 0,
            cache: HashMap::new(),
        };
        if len < DATA_START {
            tree.init()?;
        } else {
            tree.load_meta()?;
        }
        Ok(Self { tree: Mutex::new(tree) })
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: &[u8], pos: Position) -> Result<Option<Position>> {
        self.tree.lock().put(key, pos)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Position>> {
        self.tree.lock().lookup(key)
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<Position>, bool)> {
        let old = self.tree.lock().delete(key)?;
        let existed = old.is_some();
        Ok((old, existed))
    }

    fn len(&self) -> usize {
        self.tree.lock().key_count as usize
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let mut tree = self.tree.lock();
        let mut entries = Vec::with_capacity(tree.key_count as usize);
        let root = tree.root_off;
        tree.collect(root, &mut entries)?;
        Ok(Box::new(SnapshotIter::new(entries, reverse)))
    }

    fn sync(&self) -> Result<()> {
        Ok(self.tree.lock().file.sync_all()?)
    }

    fn close(&self) -> Result<()> {
        self.sync()
    }
}

struct Tree {
    file: File,
    sync_writes: bool,
    txid: u64,
    root_off: u64,
    /// Offset at which the next appended node lands.
    used: u64,
    key_count: u64,
    cache: HashMap<u64, Node>,
}

#[derive(Clone)]
enum Node {
    /// Sorted `(key, position)` pairs.
    Leaf(Vec<(Vec<u8>, Position)>),
    /// Sorted `(lowest key of subtree, child offset)` pairs.
    Branch(Vec<(Vec<u8>, u64)>),
}

impl Node {
    fn low_key(&self) -> &[u8] {
        match self {
            Node::Leaf(entries) => entries.first().map(|(k, _)| k.as_slice()).unwrap_or(b""),
            Node::Branch(children) => children.first().map(|(k, _)| k.as_slice()).unwrap_or(b""),
        }
    }
}

impl Tree {
    /// Lays out a fresh file: an empty root leaf plus the first meta slot.
    fn init(&mut self) -> Result<()> {
        let mut stage = Stage::new(DATA_START);
        let root = stage.add(Node::Leaf(Vec::new()));
        self.commit(stage, root)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn load_meta(&mut self) -> Result<()> {
        let mut best: Option<Meta> = None;
        for slot in 0..2u64 {
            let mut buf = [0u8; META_LEN];
            if read_exact_at(&self.file, &mut buf, slot * META_SLOT_SIZE).is_err() {
                continue;
            }
            if let Some(meta) = Meta::decode(&buf) {
                if best.as_ref().map_or(true, |current| meta.txid > current.txid) {
                    best = Some(meta);
                }
            }
        }
        let meta = best.ok_or_else(|| Error::Corrupt("no valid meta slot".into()))?;
        self.txid = meta.txid;
        self.root_off = meta.root_off;
        self.used = meta.used;
        self.key_count = meta.key_count;
        Ok(())
    }

    fn put(&mut self, key: &[u8], pos: Position) -> Result<Option<Position>> {
        let mut stage = Stage::new(self.used);
        let (mut repl, old) = self.insert_rec(self.root_off, key, pos, &mut stage)?;
        let new_root = if repl.len() == 1 {
            repl.remove(0).1
        } else {
            // The old root split: a fresh root routes between the halves.
            stage.add(Node::Branch(repl))
        };
        if old.is_none() {
            self.key_count += 1;
        }
        self.commit(stage, new_root)?;
        Ok(old)
    }

    fn insert_rec(
        &mut self,
        off: u64,
        key: &[u8],
        pos: Position,
        stage: &mut Stage,
    ) -> Result<(Vec<(Vec<u8>, u64)>, Option<Position>)> {
        let node = self.node(off)?.clone();
        match node {
            Node::Leaf(mut entries) => {
                let old = match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
                    Ok(i) => Some(std::mem::replace(&mut entries[i].1, pos)),
                    Err(i) => {
                        entries.insert(i, (key.to_vec(), pos));
                        None
                    }
                };
                let parts = split_if_full(entries, Node::Leaf);
                Ok((stage_parts(parts, stage), old))
            }
            Node::Branch(mut children) => {
                let idx = child_index(&children, key);
                let child_off = children[idx].1;
                let (repl, old) = self.insert_rec(child_off, key, pos, stage)?;
                children.splice(idx..=idx, repl);
                let parts = split_if_full(children, Node::Branch);
                Ok((stage_parts(parts, stage), old))
            }
        }
    }

    fn delete(&mut self, key: &[u8]) -> Result<Option<Position>> {
        let mut stage = Stage::new(self.used);
        let (repl, old) = self.delete_rec(self.root_off, key, &mut stage)?;
        let repl = match repl {
            None => return Ok(None),
            Some(parts) => parts,
        };
        let new_root = match repl.len() {
            0 => stage.add(Node::Leaf(Vec::new())),
            1 => repl[0].1,
            _ => stage.add(Node::Branch(repl)),
        };
        self.key_count -= 1;
        self.commit(stage, new_root)?;
        Ok(old)
    }

    /// Returns `None` when the key was absent (nothing staged), otherwise
    /// the replacement entries for the rewritten node (empty when the node
    /// lost its last entry).
    fn delete_rec(
        &mut self,
        off: u64,
        key: &[u8],
        stage: &mut Stage,
    ) -> Result<(Option<Vec<(Vec<u8>, u64)>>, Option<Position>)> {
        let node = self.node(off)?.clone();
        match node {
            Node::Leaf(mut entries) => {
                match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
                    Err(_) => Ok((None, None)),
                    Ok(i) => {
                        let (_, old) = entries.remove(i);
                        if entries.is_empty() {
                            Ok((Some(Vec::new()), Some(old)))
                        } else {
                            let parts = stage_parts(vec![Node::Leaf(entries)], stage);
                            Ok((Some(parts), Some(old)))
                        }
                    }
                }
            }
            Node::Branch(mut children) => {
                let idx = child_index(&children, key);
                let child_off = children[idx].1;
                let (repl, old) = self.delete_rec(child_off, key, stage)?;
                let repl = match repl {
                    None => return Ok((None, None)),
                    Some(parts) => parts,
                };
                children.splice(idx..=idx, repl);
                if children.is_empty() {
                    Ok((Some(Vec::new()), old))
                } else {
                    let parts = stage_parts(vec![Node::Branch(children)], stage);
                    Ok((Some(parts), old))
                }
            }
        }
    }

    fn lookup(&mut self, key: &[u8]) -> Result<Option<Position>> {
        let mut off = self.root_off;
        loop {
            let next = match self.node(off)? {
                Node::Leaf(entries) => {
                    return Ok(entries
                        .binary_search_by(|(k, _)| k.as_slice().cmp(key))
                        .ok()
                        .map(|i| entries[i].1));
                }
                Node::Branch(children) => children[child_index(children, key)].1,
            };
            off = next;
        }
    }

    fn collect(&mut self, off: u64, out: &mut Vec<(Vec<u8>, Position)>) -> Result<()> {
        let node = self.node(off)?.clone();
        match node {
            Node::Leaf(entries) => out.extend(entries),
            Node::Branch(children) => {
                for (_, child) in children {
                    self.collect(child, out)?;
                }
            }
        }
        Ok(())
    }

    /// Persists a mutation: staged nodes first, then the meta slot for the
    /// new transaction id. With `sync_writes` the nodes are fsynced before
    /// the meta flips, so the new root never points at unsynced blocks.
    fn commit(&mut self, stage: Stage, new_root: u64) -> Result<()> {
        if !stage.buf.is_empty() {
            write_all_at(&self.file, &stage.buf, stage.base)?;
            if self.sync_writes {
                self.file.sync_data()?;
            }
        }
        self.used = stage.base + stage.buf.len() as u64;
        self.root_off = new_root;
        self.txid += 1;

        if self.cache.len() > NODE_CACHE_LIMIT {
            self.cache.clear();
        }
        for (off, node) in stage.nodes {
            self.cache.insert(off, node);
        }

        let meta = Meta {
            txid: self.txid,
            root_off: self.root_off,
            used: self.used,
            key_count: self.key_count,
        };
        write_all_at(&self.file, &meta.encode(), (self.txid % 2) * META_SLOT_SIZE)?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn node(&mut self, off: u64) -> Result<&Node> {
        if !self.cache.contains_key(&off) {
            let node = self.read_node(off)?;
            self.cache.insert(off, node);
        }
        self.cache
            .get(&off)
            .ok_or_else(|| Error::Corrupt("node cache miss".into()))
    }

    fn read_node(&self, off: u64) -> Result<Node> {
        let mut len_buf = [0u8; 4];
        read_exact_at(&self.file, &mut len_buf, off)
            .map_err(|_| Error::Corrupt(format!("unreadable node at offset {}", off)))?;
        let len = LittleEndian::read_u32(&len_buf) as usize;
        let mut payload = vec![0u8; len];
        read_exact_at(&self.file, &mut payload, off + 4)
            .map_err(|_| Error::Corrupt(format!("truncated node at offset {}", off)))?;
        parse_node(&payload)
    }
}

fn child_index(children: &[(Vec<u8>, u64)], key: &[u8]) -> usize {
    // Last child whose low key is <= the probe; keys below every low key
    // route to the leftmost subtree.
    match children.partition_point(|(k, _)| k.as_slice() <= key) {
        0 => 0,
        n => n - 1,
    }
}

fn split_if_full<T>(entries: Vec<T>, build: fn(Vec<T>) -> Node) -> Vec<Node> {
    if entries.len() > MAX_NODE_ENTRIES {
        let mut left = entries;
        let right = left.split_off(left.len() / 2);
        vec![build(left), build(right)]
    } else {
        vec![build(entries)]
    }
}

fn stage_parts(parts: Vec<Node>, stage: &mut Stage) -> Vec<(Vec<u8>, u64)> {
    parts
        .into_iter()
        .map(|node| {
            let low = node.low_key().to_vec();
            let off = stage.add(node);
            (low, off)
        })
        .collect()
}

/// New node versions for one mutation, serialized contiguously and written
/// in a single positioned write at the end of the file.
struct Stage {
    base: u64,
    buf: Vec<u8>,
    nodes: Vec<(u64, Node)>,
}

impl Stage {
    fn new(base: u64) -> Self {
        Self {
            base,
            buf: Vec::new(),
            nodes: Vec::new(),
        }
    }

    fn add(&mut self, node: Node) -> u64 {
        let off = self.base + self.buf.len() as u64;
        serialize_node(&node, &mut self.buf);
        self.nodes.push((off, node));
        off
    }
}

fn serialize_node(node: &Node, out: &mut Vec<u8>) {
    let len_at = out.len();
    out.extend_from_slice(&[0u8; 4]); // block length, backfilled
    let payload_at = out.len();

    match node {
        Node::Leaf(entries) => {
            out.push(LEAF_TAG);
            push_u16(out, entries.len() as u16);
            for (key, pos) in entries {
                push_bytes(out, key);
                out.extend_from_slice(&pos.encode());
            }
        }
        Node::Branch(children) => {
            out.push(BRANCH_TAG);
            push_u16(out, children.len() as u16);
            for (key, child) in children {
                push_bytes(out, key);
                push_u64(out, *child);
            }
        }
    }

    let len = (out.len() - payload_at) as u32;
    LittleEndian::write_u32(&mut out[len_at..len_at + 4], len);
}

fn parse_node(buf: &[u8]) -> Result<Node> {
    if buf.len() < 3 {
        return Err(Error::Corrupt("node block too short".into()));
    }
    let tag = buf[0];
    let count = LittleEndian::read_u16(&buf[1..3]) as usize;
    let mut at = 3usize;
    match tag {
        LEAF_TAG => {
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let key = take_bytes(buf, &mut at)?;
                let packed = take_n(buf, &mut at, POSITION_PACKED_LEN)?;
                entries.push((key, Position::decode(packed)?));
            }
            Ok(Node::Leaf(entries))
        }
        BRANCH_TAG => {
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                let key = take_bytes(buf, &mut at)?;
                let child = take_n(buf, &mut at, 8)?;
                children.push((key, BigEndian::read_u64(child)));
            }
            Ok(Node::Branch(children))
        }
        other => Err(Error::Corrupt(format!("unknown node tag {}", other))),
    }
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, v);
    out.extend_from_slice(&buf);
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, v);
    out.extend_from_slice(&buf);
}

fn push_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, bytes.len() as u32);
    out.extend_from_slice(&buf);
    out.extend_from_slice(bytes);
}

fn take_n<'a>(buf: &'a [u8], at: &mut usize, n: usize) -> Result<&'a [u8]> {
    if *at + n > buf.len() {
        return Err(Error::Corrupt("node entry out of bounds".into()));
    }
    let slice = &buf[*at..*at + n];
    *at += n;
    Ok(slice)
}

fn take_bytes(buf: &[u8], at: &mut usize) -> Result<Vec<u8>> {
    let len_bytes = take_n(buf, at, 4)?;
    let len = LittleEndian::read_u32(len_bytes) as usize;
    Ok(take_n(buf, at, len)?.to_vec())
}

fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.write_all_at(buf, offset)
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        let mut written = 0usize;
        while written < buf.len() {
            let n = file.seek_write(&buf[written..], offset + written as u64)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "short write"));
            }
            written += n;
        }
        Ok(())
    }
}

fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(buf, offset)
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        let mut read = 0usize;
        while read < buf.len() {
            let n = file.seek_read(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read"));
            }
            read += n;
        }
        Ok(())
    }
}

struct Meta {
    txid: u64,
    root_off: u64,
    used: u64,
    key_count: u64,
}

impl Meta {
    fn encode(&self) -> [u8; META_LEN] {
        let mut buf = [0u8; META_LEN];
        BigEndian::write_u32(&mut buf[0..4], META_MAGIC);
        BigEndian::write_u64(&mut buf[4..12], self.txid);
        BigEndian::write_u64(&mut buf[12..20], self.root_off);
        BigEndian::write_u64(&mut buf[20..28], self.used);
        BigEndian::write_u64(&mut buf[28..36], self.key_count);
        let mut hasher = Crc32::new();
        hasher.update(&buf[0..36]);
        BigEndian::write_u32(&mut buf[36..40], hasher.finalize());
        buf
    }

    fn decode(buf: &[u8; META_LEN]) -> Option<Self> {
        if BigEndian::read_u32(&buf[0..4]) != META_MAGIC {
            return None;
        }
        let mut hasher = Crc32::new();
        hasher.update(&buf[0..36]);
        if hasher.finalize() != BigEndian::read_u32(&buf[36..40]) {
            return None;
        }
        Some(Self {
            txid: BigEndian::read_u64(&buf[4..12]),
            root_off: BigEndian::read_u64(&buf[12..20]),
            used: BigEndian::read_u64(&buf[20..28]),
            key_count: BigEndian::read_u64(&buf[28..36]),
        })
    }
}
