//! Record stream binary format.
//!
//! A stream file is a headerless sequence of fixed-width frames:
//!
//! ```text
//! [crc32: u32 LE][key: 64 B][tsec: u64 LE][tnsec: u64 LE][size: u64 LE][user_flags: u64 LE]
//! ```
//!
//! The CRC32 covers everything after itself. There is no footer, so a file
//! that was abandoned mid-write is still readable: its record count is
//! `file_len / RECORD_BYTES` and a trailing partial frame is ignored.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::io::{Read, Result as IoResult, Write};

use crate::record::{Key, Record, Timestamp, KEY_SIZE};

/// Size of the frame body: key + tsec + tnsec + size + user_flags.
pub const RECORD_BODY_BYTES: usize = KEY_SIZE + 8 + 8 + 8 + 8;

/// Size of one on-disk frame: 4 (`crc32`) + body.
pub const RECORD_BYTES: usize = 4 + RECORD_BODY_BYTES;

/// Number of complete frames in a file of `file_len` bytes.
#[must_use]
pub fn record_count(file_len: u64) -> u64 {
    file_len / RECORD_BYTES as u64
}

/// Serializes `record` into `frame`, computing the CRC over the body.
pub fn encode_record(record: &Record, frame: &mut [u8; RECORD_BYTES]) -> IoResult<()> {
    {
        let mut body = &mut frame[4..];
        body.write_all(record.key.as_bytes())?;
        body.write_u64::<LittleEndian>(record.timestamp.tsec)?;
        body.write_u64::<LittleEndian>(record.timestamp.tnsec)?;
        body.write_u64::<LittleEndian>(record.size)?;
        body.write_u64::<LittleEndian>(record.user_flags)?;
    }

    let mut hasher = Crc32::new();
    hasher.update(&frame[4..]);
    let crc = hasher.finalize();
    frame[..4].copy_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Parses a frame, returning `None` if its CRC does not match the body.
#[must_use]
pub fn decode_record(frame: &[u8; RECORD_BYTES]) -> Option<Record> {
    let mut r = &frame[..];
    let stored_crc = r.read_u32::<LittleEndian>().ok()?;

    let mut hasher = Crc32::new();
    hasher.update(&frame[4..]);
    if hasher.finalize() != stored_crc {
        return None;
    }

    let mut key = [0u8; KEY_SIZE];
    r.read_exact(&mut key).ok()?;
    let tsec = r.read_u64::<LittleEndian>().ok()?;
    let tnsec = r.read_u64::<LittleEndian>().ok()?;
    let size = r.read_u64::<LittleEndian>().ok()?;
    let user_flags = r.read_u64::<LittleEndian>().ok()?;

    Some(Record {
        key: Key(key),
        timestamp: Timestamp::new(tsec, tnsec),
        size,
        user_flags,
    })
}
