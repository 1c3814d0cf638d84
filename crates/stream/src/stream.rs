use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result, StreamError};
use crate::format::{decode_record, encode_record, record_count, RECORD_BYTES};
use crate::record::{Address, Record};

/// An append-only, file-backed sequence of [`Record`]s belonging to one node.
///
/// Records are buffered on append and reach the file on [`flush`], which
/// [`iter`], [`sort`] and [`diff`] call implicitly. The stream tracks whether
/// its contents are known to be sorted by [`Record::priority_cmp`]: appending
/// in order keeps the flag, appending out of order clears it.
///
/// # Ownership
///
/// The stream exclusively owns its backing file. Unless `leave_file` is set
/// the file is deleted by [`remove`] or, failing that, when the stream is
/// dropped. Streams attached to existing files ([`open`], [`load`]) default
/// to `leave_file = true`; freshly created ones default to `false`.
///
/// [`flush`]: RecordStream::flush
/// [`iter`]: RecordStream::iter
/// [`sort`]: RecordStream::sort
/// [`diff`]: RecordStream::diff
/// [`remove`]: RecordStream::remove
/// [`open`]: RecordStream::open
/// [`load`]: RecordStream::load
pub struct RecordStream {
    pub(crate) path: PathBuf,
    pub(crate) address: Address,
    pub(crate) writer: BufWriter<File>,
    /// Number of complete records in the stream.
    pub(crate) len: u64,
    pub(crate) sorted: bool,
    /// Last appended record, used to keep `sorted` accurate on append.
    pub(crate) last: Option<Record>,
    pub(crate) leave_file: bool,
    removed: bool,
    pub(crate) sort_chunk_records: usize,
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("path", &self.path)
            .field("address", &self.address)
            .field("len", &self.len)
            .field("sorted", &self.sorted)
            .field("leave_file", &self.leave_file)
            .field("removed", &self.removed)
            .finish()
    }
}

impl RecordStream {
    /// Creates an empty stream backed by a new (or truncated) file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, address: Address) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .op("create", &path)?;
        Ok(Self::from_parts(path, address, file, 0, true, false))
    }

    /// Attaches to an existing stream file.
    ///
    /// The record count is derived from the file length; a trailing partial
    /// frame (left by an interrupted writer) is ignored and will be
    /// overwritten by the next append. `sorted` states whether the caller
    /// trusts the contents to be in record order already.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] if the file does not exist or cannot be
    /// opened for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P, address: Address, sorted: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .op("open", &path)?;
        let file_len = file.metadata().op("open", &path)?.len();
        let len = record_count(file_len);
        if file_len % RECORD_BYTES as u64 != 0 {
            tracing::warn!(
                path = %path.display(),
                file_len,
                records = len,
                "ignoring truncated trailing record"
            );
        }

        let mut stream = Self::from_parts(path, address, file, len, sorted || len == 0, true);
        stream
            .writer
            .seek(SeekFrom::Start(len * RECORD_BYTES as u64))
            .op("open", &stream.path)?;
        Ok(stream)
    }

    /// Like [`open`](RecordStream::open), but returns `Ok(None)` when no file
    /// exists at `path`. Used to re-attach to diffs computed by an earlier
    /// run without recomputing them.
    pub fn load<P: AsRef<Path>>(path: P, address: Address, sorted: bool) -> Result<Option<Self>> {
        if !path.as_ref().exists() {
            return Ok(None);
        }
        Self::open(path, address, sorted).map(Some)
    }

    fn from_parts(
        path: PathBuf,
        address: Address,
        file: File,
        len: u64,
        sorted: bool,
        leave_file: bool,
    ) -> Self {
        Self {
            path,
            address,
            writer: BufWriter::new(file),
            len,
            sorted,
            last: None,
            leave_file,
            removed: false,
            sort_chunk_records: config::DEFAULT_SORT_CHUNK_RECORDS,
        }
    }

    /// Appends a record at the end of the stream. No ordering is enforced.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] if the write fails.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        self.push(record, "append")
    }

    /// Appends a merge winner to this node's output queue.
    ///
    /// Same contract as [`append`](RecordStream::append); it is the only
    /// mutation performed on streams while a merge is running, and since
    /// merge output is produced in record order the stream stays sorted.
    pub fn append_winner(&mut self, record: &Record) -> Result<()> {
        self.push(record, "append_winner")
    }

    fn push(&mut self, record: &Record, op: &'static str) -> Result<()> {
        let mut frame = [0u8; RECORD_BYTES];
        encode_record(record, &mut frame).op(op, &self.path)?;
        self.writer.write_all(&frame).op(op, &self.path)?;

        if self.sorted {
            self.sorted = match &self.last {
                Some(last) => last.priority_cmp(record) != Ordering::Greater,
                None => self.len == 0,
            };
        }
        self.last = Some(*record);
        self.len += 1;
        Ok(())
    }

    /// Pushes buffered appends to the backing file.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().op("flush", &self.path)
    }

    /// Flushes and fsyncs the backing file.
    pub fn sync_to_disk(&mut self) -> Result<()> {
        self.flush()?;
        self.writer.get_ref().sync_all().op("sync", &self.path)
    }

    /// Returns a lazy iterator over the records in on-disk order.
    ///
    /// Each call starts from the first record. The iterator covers the
    /// records present at the time of the call.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] if buffered records cannot be flushed or
    /// the file cannot be reopened for reading.
    pub fn iter(&mut self) -> Result<RecordIter> {
        self.flush()?;
        RecordIter::open(&self.path, self.len)
    }

    /// Copies the backing file to `dest` and attaches a new stream to the
    /// copy, keeping this stream's address and sorted flag. The copy is
    /// persisted (`leave_file = true`).
    ///
    /// If `dest` already is this stream's file nothing is copied: the file is
    /// re-attached and this stream stops owning it, so dropping either handle
    /// keeps the data.
    pub fn copy_to<P: AsRef<Path>>(&mut self, dest: P) -> Result<RecordStream> {
        self.flush()?;
        if self.is_backed_by(dest.as_ref()) {
            self.leave_file = true;
        } else {
            std::fs::copy(&self.path, dest.as_ref()).op("copy", &self.path)?;
        }
        let mut copy = RecordStream::open(dest, self.address.clone(), self.sorted)?;
        copy.sort_chunk_records = self.sort_chunk_records;
        Ok(copy)
    }

    /// Returns `true` if `path` names this stream's backing file, after
    /// resolving symlinks and relative components. A path that does not
    /// exist never matches.
    #[must_use]
    pub fn is_backed_by(&self, path: &Path) -> bool {
        match (std::fs::canonicalize(&self.path), std::fs::canonicalize(path)) {
            (Ok(mine), Ok(other)) => mine == other,
            _ => false,
        }
    }

    /// Deletes the backing file.
    ///
    /// Idempotent. Failures are logged and swallowed: cleanup must never
    /// abort a recovery run. The stream must not be appended to afterwards.
    pub fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed stream file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "stream file already gone");
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "can't remove stream file");
            }
        }
    }

    /// Returns the number of records in the stream.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the stream holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if the records are known to be in record order.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// The node these records belong to.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn leave_file(&self) -> bool {
        self.leave_file
    }

    /// Keeps (`true`) or releases (`false`) the backing file when the stream
    /// is dropped.
    pub fn set_leave_file(&mut self, leave_file: bool) {
        self.leave_file = leave_file;
    }

    /// Records held in memory per external-sort run.
    #[must_use]
    pub fn sort_chunk_records(&self) -> usize {
        self.sort_chunk_records
    }

    /// Sets how many records [`sort`](RecordStream::sort) holds in memory per
    /// run. Values below 1 are treated as 1.
    pub fn set_sort_chunk_records(&mut self, records: usize) {
        self.sort_chunk_records = records.max(1);
    }
}

/// Best-effort cleanup on drop.
///
/// Persisted streams get a final flush; owned ones have their file removed.
/// Errors are logged because Drop cannot propagate them.
impl Drop for RecordStream {
    fn drop(&mut self) {
        if self.leave_file {
            if let Err(e) = self.writer.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "final flush failed");
            }
        } else {
            self.remove();
        }
    }
}

/// Forward-only reader over a fixed number of frames of a stream file.
///
/// Yields `Err` once and then stops if a frame cannot be read or fails its
/// CRC check.
pub struct RecordIter {
    reader: BufReader<File>,
    path: PathBuf,
    remaining: u64,
    offset: u64,
}

impl RecordIter {
    pub(crate) fn open(path: &Path, records: u64) -> Result<Self> {
        let file = File::open(path).op("read", path)?;
        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            remaining: records,
            offset: 0,
        })
    }
}

impl Iterator for RecordIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let mut frame = [0u8; RECORD_BYTES];
        if let Err(e) = self.reader.read_exact(&mut frame) {
            self.remaining = 0;
            return Some(Err(StreamError::Io {
                op: "read",
                path: self.path.clone(),
                source: e,
            }));
        }

        let offset = self.offset;
        self.offset += RECORD_BYTES as u64;
        self.remaining -= 1;

        match decode_record(&frame) {
            Some(record) => Some(Ok(record)),
            None => {
                self.remaining = 0;
                Some(Err(StreamError::Corrupt {
                    path: self.path.clone(),
                    offset,
                }))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}
