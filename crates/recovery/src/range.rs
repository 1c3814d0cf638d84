//! Key ranges and the binary-search router that shards records by range.

use stream::Key;

use crate::RecoveryError;

/// Position of a key relative to a [`KeyRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    Below,
    Within,
    Above,
}

/// A slice of the key space tagged with the partition it feeds.
///
/// Covers `[start, end)`; a range ending at [`Key::MAX`] also includes
/// `Key::MAX` itself, so [`KeyRange::whole`] covers every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Key,
    pub end: Key,
    pub range_id: u32,
}

impl KeyRange {
    #[must_use]
    pub fn new(start: Key, end: Key, range_id: u32) -> Self {
        Self {
            start,
            end,
            range_id,
        }
    }

    /// The entire key space as a single range.
    #[must_use]
    pub fn whole(range_id: u32) -> Self {
        Self::new(Key::MIN, Key::MAX, range_id)
    }

    /// Three-way comparison of `key` against this range.
    #[must_use]
    pub fn check_key(&self, key: &Key) -> KeyCheck {
        if *key < self.start {
            KeyCheck::Below
        } else if *key < self.end || self.end == Key::MAX {
            KeyCheck::Within
        } else {
            KeyCheck::Above
        }
    }

    /// The `(start, end)` pair handed to the remote iteration service.
    #[must_use]
    pub fn to_native(&self) -> (Key, Key) {
        (self.start, self.end)
    }
}

/// Maps keys to partition ids.
///
/// In partitioned mode the ranges are kept sorted and non-overlapping and
/// [`route`](KeyRangeRouter::route) binary-searches them. In single-partition
/// mode every key routes to partition `0` without a search.
#[derive(Debug, Clone)]
pub struct KeyRangeRouter {
    ranges: Vec<KeyRange>,
    separately: bool,
}

impl KeyRangeRouter {
    /// Builds a router over `ranges`.
    ///
    /// Ranges are sorted by start key. Every range must be non-empty
    /// (`start < end`); in partitioned mode they must also not overlap.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::InvalidRanges`] if `ranges` is empty, a range
    /// is inverted, or (partitioned mode) two ranges overlap.
    pub fn new(mut ranges: Vec<KeyRange>, separately: bool) -> Result<Self, RecoveryError> {
        if ranges.is_empty() {
            return Err(RecoveryError::InvalidRanges(
                "there should be at least one iteration range".into(),
            ));
        }
        if let Some(bad) = ranges.iter().find(|r| r.start >= r.end) {
            return Err(RecoveryError::InvalidRanges(format!(
                "range {} is empty: {} >= {}",
                bad.range_id, bad.start, bad.end
            )));
        }

        ranges.sort_by(|a, b| a.start.cmp(&b.start));
        if separately {
            for pair in ranges.windows(2) {
                if pair[0].end > pair[1].start {
                    return Err(RecoveryError::InvalidRanges(format!(
                        "ranges {} and {} overlap",
                        pair[0].range_id, pair[1].range_id
                    )));
                }
            }
        }

        Ok(Self { ranges, separately })
    }

    /// Returns the partition owning `key`, or `None` if no range holds it.
    #[must_use]
    pub fn route(&self, key: &Key) -> Option<u32> {
        if !self.separately {
            return Some(0);
        }

        let mut start = 0;
        let mut stop = self.ranges.len();
        while start < stop {
            let mid = start + (stop - start) / 2;
            let range = &self.ranges[mid];
            match range.check_key(key) {
                KeyCheck::Within => return Some(range.range_id),
                KeyCheck::Below => stop = mid,
                KeyCheck::Above => start = mid + 1,
            }
        }
        tracing::debug!(key = %key, "no range found for key");
        None
    }

    /// Distinct partition ids, ascending. `[0]` in single-partition mode.
    #[must_use]
    pub fn partition_ids(&self) -> Vec<u32> {
        if !self.separately {
            return vec![0];
        }
        let mut ids: Vec<u32> = self.ranges.iter().map(|r| r.range_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// The ranges in start-key order.
    #[must_use]
    pub fn ranges(&self) -> &[KeyRange] {
        &self.ranges
    }

    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        self.separately
    }
}
