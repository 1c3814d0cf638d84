//! # Stream - disk-backed record containers
//!
//! Per-node metadata snapshots used by anti-entropy recovery. A snapshot can
//! be far larger than memory, so every container is a file: records are
//! appended while a node's key space is iterated, externally sorted, and then
//! diffed against other nodes' snapshots to find what each replica lacks.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ FRAME 0                                                       │
//! │                                                               │
//! │ crc32 (u32) | key (64 B) | tsec (u64) | tnsec (u64)           │
//! │ size (u64) | user_flags (u64)                                 │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FRAME 1 ...                                                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian and every frame is exactly
//! [`RECORD_BYTES`] long, so the record count follows from the file size and
//! a file abandoned mid-append is still readable. The CRC32 covers the rest of
//! the frame and is checked on every read.
//!
//! ## Record order
//!
//! Sort, diff and merge all use [`Record::priority_cmp`]:
//!
//! | Priority | Field       | Direction  |
//! |----------|-------------|------------|
//! | 1        | `key`       | ascending  |
//! | 2        | `timestamp` | descending |
//! | 3        | `size`      | descending |

mod diff;
mod error;
mod format;
mod record;
mod sort;
mod stream;

pub use diff::diff_file_name;
pub use error::{Result, StreamError};
pub use format::{decode_record, encode_record, record_count, RECORD_BODY_BYTES, RECORD_BYTES};
pub use sort::HeapEntry;
pub use record::{Address, AddressParseError, Key, Record, Timestamp, KEY_SIZE};
pub use stream::{RecordIter, RecordStream};

#[cfg(test)]
mod tests;
