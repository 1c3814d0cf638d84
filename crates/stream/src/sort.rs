//! External sort for [`RecordStream`].
//!
//! Streams that fit in one chunk are sorted in memory. Larger streams are cut
//! into chunks of `sort_chunk_records`, each chunk is sorted and spilled to a
//! run file next to the stream, and the runs are k-way merged through a
//! min-heap. Either way the sorted output is written to a temp file which then
//! atomically replaces the backing file.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};
use crate::record::Record;
use crate::stream::{RecordIter, RecordStream};

/// The head record of one sorted source, ordered so that [`BinaryHeap`]
/// (a max-heap) pops the smallest record by [`Record::priority_cmp`] first.
///
/// Shared by the external sort's run merge and the cross-node merge.
#[derive(Debug, Clone, Copy)]
pub struct HeapEntry {
    pub record: Record,
    /// Index of the source the record came from; lower wins full ties.
    pub source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest record pops first.
        // On a full tie the earlier run wins, which keeps the sort stable.
        other
            .record
            .priority_cmp(&self.record)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// `<file name><suffix>` in the same directory as `path`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

impl RecordStream {
    /// Sorts the stream by [`Record::priority_cmp`]: key ascending, then
    /// timestamp descending, then size descending.
    ///
    /// A stream already known to be sorted is left untouched. Memory use is
    /// bounded by `sort_chunk_records` records regardless of stream size.
    ///
    /// # Errors
    ///
    /// Returns a storage error if reading the stream, writing a run or the
    /// output, or replacing the backing file fails. Run and temp files are
    /// removed on every exit path; the original file is only replaced once
    /// the sorted copy is complete and synced.
    pub fn sort(&mut self) -> Result<()> {
        if self.sorted {
            return Ok(());
        }
        self.flush()?;

        let chunk = self.sort_chunk_records.max(1);
        let mut out = RecordStream::create(sibling(&self.path, ".sort.tmp"), self.address.clone())?;
        let mut run_count = 0usize;

        if self.len <= chunk as u64 {
            let mut records = self.iter()?.collect::<Result<Vec<_>>>()?;
            records.sort_by(Record::priority_cmp);
            for record in &records {
                out.append_winner(record)?;
            }
        } else {
            let mut runs: Vec<RecordStream> = Vec::new();
            let mut input = self.iter()?;
            loop {
                let mut records = Vec::with_capacity(chunk);
                for record in input.by_ref().take(chunk) {
                    records.push(record?);
                }
                if records.is_empty() {
                    break;
                }
                records.sort_by(Record::priority_cmp);

                let run_path = sibling(&self.path, &format!(".run-{}", runs.len()));
                let mut run = RecordStream::create(run_path, self.address.clone())?;
                for record in &records {
                    run.append_winner(record)?;
                }
                runs.push(run);
            }
            run_count = runs.len();
            merge_runs(&mut runs, &mut out)?;
            // `runs` drops here and removes its files.
        }

        if out.len != self.len {
            tracing::warn!(
                path = %self.path.display(),
                expected = self.len,
                sorted = out.len,
                "record count changed during sort"
            );
        }

        out.sync_to_disk()?;
        std::fs::rename(&out.path, &self.path).op("sort", &self.path)?;
        // The temp name no longer exists; stop `out` from trying to delete it.
        out.set_leave_file(true);
        sync_parent_dir(&self.path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .op("sort", &self.path)?;
        self.writer = BufWriter::new(file);
        self.writer.seek(SeekFrom::End(0)).op("sort", &self.path)?;
        self.len = out.len;
        self.last = out.last;
        self.sorted = true;

        tracing::debug!(
            path = %self.path.display(),
            records = self.len,
            runs = run_count,
            "sorted stream"
        );
        Ok(())
    }
}

/// Merges sorted runs into `out` in record order.
fn merge_runs(runs: &mut [RecordStream], out: &mut RecordStream) -> Result<()> {
    let mut iters: Vec<RecordIter> = Vec::with_capacity(runs.len());
    let mut heap = BinaryHeap::with_capacity(runs.len());

    for (source, run) in runs.iter_mut().enumerate() {
        let mut iter = run.iter()?;
        if let Some(record) = iter.next().transpose()? {
            heap.push(HeapEntry { record, source });
        }
        iters.push(iter);
    }

    while let Some(HeapEntry { record, source }) = heap.pop() {
        out.append_winner(&record)?;
        if let Some(next) = iters[source].next().transpose()? {
            heap.push(HeapEntry {
                record: next,
                source,
            });
        }
    }
    Ok(())
}

/// Fsyncs the parent directory so a rename survives a crash. Best effort:
/// failures are logged and the sort still succeeds.
pub(crate) fn sync_parent_dir(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    let result = std::fs::File::open(parent).and_then(|dir| dir.sync_all());
    if let Err(e) = &result {
        tracing::debug!(path = %parent.display(), error = %e, "can't fsync parent directory");
    }
    result.is_ok()
}
