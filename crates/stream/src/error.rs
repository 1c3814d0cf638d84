use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Storage errors raised by [`RecordStream`](crate::RecordStream) operations.
///
/// Every variant names the backing file so the failure can be traced to a
/// node and a stage of the recovery run.
#[derive(Debug, Error)]
pub enum StreamError {
    /// An underlying I/O error during `op` (append, read, sort, diff, ...).
    #[error("{op} failed on {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A frame failed CRC validation.
    #[error("corrupt record in {} at offset {offset}", path.display())]
    Corrupt { path: PathBuf, offset: u64 },

    /// A diff or merge was requested on a stream not known to be sorted.
    #[error("{} must be sorted before diff or merge", path.display())]
    Unsorted { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Attaches the operation name and file path to an [`io::Error`].
pub(crate) trait IoResultExt<T> {
    fn op(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn op(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| StreamError::Io {
            op,
            path: path.to_path_buf(),
            source,
        })
    }
}
