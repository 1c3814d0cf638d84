//! Metadata record model: keys, timestamps, node addresses and the single
//! record ordering shared by sort, diff and merge.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Width of a key in bytes (512-bit ids, as produced by the store's hashing).
pub const KEY_SIZE: usize = 64;

/// Fixed-width key, compared lexicographically as unsigned bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub [u8; KEY_SIZE]);

impl Key {
    /// The smallest key (all zero bytes).
    pub const MIN: Key = Key([0x00; KEY_SIZE]);
    /// The largest key (all `0xff` bytes).
    pub const MAX: Key = Key([0xff; KEY_SIZE]);

    /// Builds a key from a byte slice, zero-padding or truncating to
    /// [`KEY_SIZE`].
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut id = [0u8; KEY_SIZE];
        let n = bytes.len().min(KEY_SIZE);
        id[..n].copy_from_slice(&bytes[..n]);
        Key(id)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Places `v` big-endian in the leading bytes, so numeric order is key order.
impl From<u64> for Key {
    fn from(v: u64) -> Self {
        Key::from_slice(&v.to_be_bytes())
    }
}

impl fmt::Display for Key {
    /// Short form: the first six bytes in hex, like the store's own logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..6] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// Logical clock of a record: seconds plus nanoseconds.
///
/// The derived ordering compares `(tsec, tnsec)` as a tuple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub tsec: u64,
    pub tnsec: u64,
}

impl Timestamp {
    pub const MIN: Timestamp = Timestamp { tsec: 0, tnsec: 0 };
    pub const MAX: Timestamp = Timestamp {
        tsec: u64::MAX,
        tnsec: u64::MAX,
    };

    #[must_use]
    pub const fn new(tsec: u64, tnsec: u64) -> Self {
        Self { tsec, tnsec }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.tsec, self.tnsec)
    }
}

/// One key's metadata as reported by a node.
///
/// The owning node is not stored here: a record belongs to whichever
/// [`RecordStream`](crate::RecordStream) holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub key: Key,
    pub timestamp: Timestamp,
    /// Payload length in bytes.
    pub size: u64,
    /// Opaque user bitfield, carried through untouched.
    pub user_flags: u64,
}

impl Record {
    #[must_use]
    pub fn new(key: Key, timestamp: Timestamp, size: u64, user_flags: u64) -> Self {
        Self {
            key,
            timestamp,
            size,
            user_flags,
        }
    }

    /// The record ordering used everywhere records are compared:
    /// `key` ascending, then `timestamp` descending, then `size` descending.
    ///
    /// For two records with the same key, `Less` means `self` is the more
    /// authoritative one.
    #[must_use]
    pub fn priority_cmp(&self, other: &Record) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.timestamp.cmp(&self.timestamp))
            .then_with(|| other.size.cmp(&self.size))
    }
}

/// Identity of a storage node: `host:port` plus the replica group it serves.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
    pub group_id: u32,
}

impl Address {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, group_id: u32) -> Self {
        Self {
            host: host.into(),
            port,
            group_id,
        }
    }

    /// File name for a container belonging to this node, e.g.
    /// `merge_10.0.0.1-1025-2`. Colons (IPv6 hosts) and path separators are
    /// replaced so the name stays a single portable path component.
    #[must_use]
    pub fn container_name(&self, prefix: &str) -> String {
        format!(
            "{}{}-{}-{}",
            prefix,
            self.host.replace([':', '/', '\\'], "_"),
            self.port,
            self.group_id
        )
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.group_id)
    }
}

/// Returned when an address string is not `host:port:group`.
#[derive(Debug, Error)]
#[error("invalid address {0:?}: expected host:port:group")]
pub struct AddressParseError(String);

impl FromStr for Address {
    type Err = AddressParseError;

    /// Parses `host:port:group`. The host may itself contain colons (IPv6),
    /// so the string is split from the right.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, ':');
        let group = parts.next();
        let port = parts.next();
        let host = parts.next();
        match (host, port, group) {
            (Some(host), Some(port), Some(group))
                if !host.is_empty() && !host.contains(['/', '\\']) =>
            {
                let port = port.parse().map_err(|_| AddressParseError(s.to_string()))?;
                let group_id = group.parse().map_err(|_| AddressParseError(s.to_string()))?;
                Ok(Address::new(host, port, group_id))
            }
            _ => Err(AddressParseError(s.to_string())),
        }
    }
}
