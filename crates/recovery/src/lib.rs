//! # Recovery - anti-entropy collection and merge
//!
//! Orchestration-facing half of the recovery core:
//!
//! ```text
//!  remote node ──IterationService──▶ IterationDriver ──KeyRangeRouter──▶ RecordStream(s)
//!                                                                          │ sort
//!                                                                          ▼
//!                                   per-node diffs ◀──── RecordStream::diff(reference)
//!                                          │
//!                                          ▼
//!                                 merge ──▶ one deduplicated queue per node
//! ```
//!
//! - [`IterationDriver`] collects one node's metadata into disk-backed
//!   streams, one per key range when partitioned, reporting [`Progress`]
//!   as it goes.
//! - [`KeyRangeRouter`] decides which partition a key belongs to.
//! - [`merge`] combines the per-node diffs so each key is recovered from
//!   exactly one node: the one holding its newest version.
//!
//! Storage primitives (record model, frame format, sort, diff) live in the
//! `stream` crate.

mod error;
mod iterator;
mod merge;
mod range;
mod stats;

pub use error::RecoveryError;
pub use iterator::{
    Collected, IterationDriver, IterationOptions, IterationOutcome, IterationService,
    IterationSession, IteratorElement, IteratorFlags, IteratorRequest, IteratorResponse,
    IteratorType, Progress, RecordSource, SessionState,
};
pub use merge::{merge, MergeCursor};
pub use range::{KeyCheck, KeyRange, KeyRangeRouter};
pub use stats::{CounterStats, StatsSink};

#[cfg(test)]
mod tests;
