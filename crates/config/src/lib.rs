//! # Config - recovery settings
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! RECOVERY_TMP_DIR     working directory for backing files (default: "/var/tmp")
//! RECOVERY_BATCH_SIZE  iterated keys between progress reports (default: 1024)
//! RECOVERY_SORT_CHUNK  records per in-memory sort run       (default: 1048576)
//! RECOVERY_LEAVE_FILE  keep iterator files after use        (default: "false")
//! RECOVERY_SEPARATELY  one iterator file per key range      (default: "false")
//! ```

use std::path::PathBuf;
use std::str::FromStr;

/// Default progress batch size, in iterated keys.
pub const DEFAULT_BATCH_SIZE: u64 = 1024;

/// Default number of records sorted in memory before spilling a run to disk.
///
/// Records are 100 bytes on disk, so this bounds a sort run to ~100 MiB.
pub const DEFAULT_SORT_CHUNK_RECORDS: usize = 1 << 20;

/// Default working directory for iterator, diff and merge files.
pub const DEFAULT_TMP_DIR: &str = "/var/tmp";

/// Settings shared by the iteration driver, the stream layer and the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Directory holding every backing file produced by a recovery run.
    pub tmp_dir: PathBuf,
    /// Number of iterated keys between two progress reports.
    pub batch_size: u64,
    /// Records held in memory per external-sort run.
    pub sort_chunk_records: usize,
    /// Keep iterator result files on disk after their streams are dropped.
    pub leave_file: bool,
    /// Split iterator results into one stream per key range.
    pub separately: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            tmp_dir: PathBuf::from(DEFAULT_TMP_DIR),
            batch_size: DEFAULT_BATCH_SIZE,
            sort_chunk_records: DEFAULT_SORT_CHUNK_RECORDS,
            leave_file: false,
            separately: false,
        }
    }
}

impl RecoveryConfig {
    /// Builds a config from `RECOVERY_*` environment variables, falling back
    /// to the defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tmp_dir: std::env::var("RECOVERY_TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.tmp_dir),
            batch_size: env_parse("RECOVERY_BATCH_SIZE", defaults.batch_size).max(1),
            sort_chunk_records: env_parse("RECOVERY_SORT_CHUNK", defaults.sort_chunk_records)
                .max(1),
            leave_file: env_parse("RECOVERY_LEAVE_FILE", defaults.leave_file),
            separately: env_parse("RECOVERY_SEPARATELY", defaults.separately),
        }
    }
}

/// Reads and parses an environment variable, falling back to `default`.
fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, ?default, "ignoring unparsable setting");
                default
            }
        },
        Err(_) => default,
    }
}
