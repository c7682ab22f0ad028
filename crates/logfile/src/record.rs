//! The record codec: CRC32 framing, varint lengths, sequence-number key
//! tagging, and the packed `Position` form stored in hint files and the
//! on-disk index.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;

use crate::{Error, Result};

/// Largest possible header: crc(4) + type(1) + two max-width varints (5 each).
pub const HEADER_MAX: usize = 15;

/// Width of a packed [`Position`]: u32 + i64 + u32, big-endian.
pub const POSITION_PACKED_LEN: usize = 16;

/// What a record means to the key directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// A live key/value pair.
    Normal = 0,
    /// The key is deleted as of this point in the log.
    Tombstone = 1,
    /// Every record tagged with the same sequence number is now committed.
    BatchTerminator = 2,
}

impl RecordType {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(RecordType::Normal),
            1 => Ok(RecordType::Tombstone),
            2 => Ok(RecordType::BatchTerminator),
            _ => Err(Error::Corrupt),
        }
    }
}

/// One log entry as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: RecordType,
}

impl LogRecord {
    /// Encodes the record into a frame, returning the bytes and their length.
    pub fn encode(&self) -> (Vec<u8>, u64) {
        let mut buf = Vec::with_capacity(HEADER_MAX + self.key.len() + self.value.len());
        buf.extend_from_slice(&[0u8; 4]); // crc, backfilled below
        buf.push(self.rec_type as u8);
        put_varint_i64(&mut buf, self.key.len() as i64);
        put_varint_i64(&mut buf, self.value.len() as i64);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let mut hasher = Crc32::new();
        hasher.update(&buf[4..]);
        LittleEndian::write_u32(&mut buf[..4], hasher.finalize());

        let size = buf.len() as u64;
        (buf, size)
    }
}

/// The fixed portion of a record frame, parsed ahead of the key and value.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub crc: u32,
    pub rec_type: RecordType,
    pub key_size: usize,
    pub value_size: usize,
}

/// First decode phase: parses a header from `buf`, which holds at most
/// [`HEADER_MAX`] bytes (fewer near the end of the file).
///
/// Returns `Ok(None)` at a clean end of file: fewer than five readable
/// bytes, or a fully zeroed buffer (pre-allocated padding reads as EOF).
/// Returns the header and its encoded length otherwise.
pub fn decode_header(buf: &[u8]) -> Result<Option<(RecordHeader, usize)>> {
    if buf.len() < 5 {
        return Ok(None);
    }
    if buf.iter().all(|&b| b == 0) {
        return Ok(None);
    }

    let crc = LittleEndian::read_u32(&buf[..4]);
    let rec_type = RecordType::from_u8(buf[4])?;
    let (key_size, n1) = get_varint_i64(&buf[5..])?;
    let (value_size, n2) = get_varint_i64(&buf[5 + n1..])?;
    if key_size < 0 || value_size < 0 {
        return Err(Error::Corrupt);
    }

    let header = RecordHeader {
        crc,
        rec_type,
        key_size: key_size as usize,
        value_size: value_size as usize,
    };
    Ok(Some((header, 5 + n1 + n2)))
}

/// Second decode phase: checks the stored CRC against the header tail
/// (the encoded bytes after the CRC field), key, and value.
pub fn verify_crc(header: &RecordHeader, header_tail: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
    let mut hasher = Crc32::new();
    hasher.update(header_tail);
    hasher.update(key);
    hasher.update(value);
    if hasher.finalize() != header.crc {
        return Err(Error::Corrupt);
    }
    Ok(())
}

/// Physical location of an encoded record: file, byte offset, frame length.
/// The length feeds the engine's reclaimable-space accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub file_id: u32,
    pub offset: i64,
    pub size: u32,
}

impl Position {
    /// Packs the position into its fixed big-endian form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; POSITION_PACKED_LEN];
        BigEndian::write_u32(&mut buf[0..4], self.file_id);
        BigEndian::write_i64(&mut buf[4..12], self.offset);
        BigEndian::write_u32(&mut buf[12..16], self.size);
        buf
    }

    /// Unpacks a position previously written by [`Position::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < POSITION_PACKED_LEN {
            return Err(Error::Corrupt);
        }
        Ok(Self {
            file_id: BigEndian::read_u32(&buf[0..4]),
            offset: BigEndian::read_i64(&buf[4..12]),
            size: BigEndian::read_u32(&buf[12..16]),
        })
    }
}

/// Prefixes `key` with the unsigned-varint sequence number. Zero marks a
/// write outside any batch.
pub fn encode_key_with_seq(key: &[u8], seq: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + key.len());
    put_varint_u64(&mut out, seq);
    out.extend_from_slice(key);
    out
}

/// Splits an encoded key into its sequence number and the user key.
pub fn parse_record_key(key: &[u8]) -> Result<(u64, &[u8])> {
    let (seq, n) = get_varint_u64(key)?;
    Ok((seq, &key[n..]))
}

/// Appends `v` in zig-zag varint form.
pub fn put_varint_i64(buf: &mut Vec<u8>, v: i64) {
    put_varint_u64(buf, zigzag(v));
}

/// Appends `v` in base-128 varint form, low groups first.
pub fn put_varint_u64(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Reads a zig-zag varint, returning the value and its encoded length.
pub fn get_varint_i64(buf: &[u8]) -> Result<(i64, usize)> {
    let (u, n) = get_varint_u64(buf)?;
    Ok((unzigzag(u), n))
}

/// Reads a base-128 varint, returning the value and its encoded length.
pub fn get_varint_u64(buf: &[u8]) -> Result<(u64, usize)> {
    let mut v = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return Err(Error::Corrupt);
        }
        v |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((v, i + 1));
        }
        shift += 7;
    }
    // Continuation bit set on the last available byte.
    Err(Error::Corrupt)
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}
