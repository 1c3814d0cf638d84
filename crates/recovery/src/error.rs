use std::path::PathBuf;

use stream::{Address, StreamError};
use thiserror::Error;

/// Errors surfaced by the recovery layer.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The iteration request cannot be served by this core (wrong iterator
    /// type, payload requested, no ranges, zero batch size).
    #[error("invalid iteration request: {0}")]
    InvalidRequest(&'static str),

    /// Key ranges are empty, inverted, or overlap.
    #[error("invalid key ranges: {0}")]
    InvalidRanges(String),

    /// The remote iteration reported a non-zero top-level status.
    #[error("iteration status check failed: {0}")]
    IterationStatus(i32),

    /// Two merge inputs claim the same destination node.
    #[error("more than one diff stream targets {0}")]
    DuplicateDestination(Address),

    /// A merge output would overwrite one of the merge inputs.
    #[error("merge output {} is also a merge input", .0.display())]
    OutputOverlapsInput(PathBuf),

    /// A backing file could not be read or written.
    #[error(transparent)]
    Storage(#[from] StreamError),
}
