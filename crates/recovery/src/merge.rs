//! N-way merge of per-node diff streams into recovery queues.
//!
//! Every input is one node's sorted diff: the keys that node holds newer than
//! the reference. Several nodes can hold a newer version of the same key, and
//! only the newest one should be pushed back. The merge walks all diffs in
//! lockstep through a min-heap keyed by [`Record::priority_cmp`] and, for each
//! distinct key, writes exactly one record into the output of the node that
//! won it. The other nodes' entries for that key are dropped.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::path::{Path, PathBuf};

use stream::{HeapEntry, Record, RecordIter, RecordStream, StreamError};

use crate::RecoveryError;

/// Walks one sorted diff stream, one key at a time.
///
/// `current` is the best record seen for the current key; same-key runs in
/// the input are collapsed to their highest-priority record before the key
/// takes part in the cross-node merge.
pub struct MergeCursor {
    input: RecordIter,
    output: RecordStream,
    current: Record,
    lookahead: Option<Record>,
}

impl MergeCursor {
    /// Primes a cursor over `input` writing into `output`.
    ///
    /// Returns `Ok(None)` if `input` holds no records.
    pub fn new(input: &mut RecordStream, output: RecordStream) -> Result<Option<Self>, StreamError> {
        let mut iter = input.iter()?;
        let Some(current) = iter.next().transpose()? else {
            return Ok(None);
        };
        let lookahead = iter.next().transpose()?;

        let mut cursor = Self {
            input: iter,
            output,
            current,
            lookahead,
        };
        cursor.collapse()?;
        Ok(Some(cursor))
    }

    /// Moves to the next distinct key. Returns `false` once the input is
    /// exhausted, leaving `current` on the last key.
    pub fn advance(&mut self) -> Result<bool, StreamError> {
        let Some(next) = self.lookahead.take() else {
            return Ok(false);
        };
        self.current = next;
        self.lookahead = self.input.next().transpose()?;
        self.collapse()?;
        Ok(true)
    }

    fn collapse(&mut self) -> Result<(), StreamError> {
        while let Some(next) = self.lookahead {
            if next.key != self.current.key {
                break;
            }
            if next.priority_cmp(&self.current) == Ordering::Less {
                self.current = next;
            }
            self.lookahead = self.input.next().transpose()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn current(&self) -> &Record {
        &self.current
    }

    /// Appends `current` to this cursor's own output.
    pub fn emit(&mut self) -> Result<(), StreamError> {
        self.output.append_winner(&self.current)
    }

    #[must_use]
    pub fn output(&self) -> &RecordStream {
        &self.output
    }

    /// Finalizes and releases the output stream.
    pub fn into_output(mut self) -> Result<RecordStream, StreamError> {
        self.output.flush()?;
        Ok(self.output)
    }
}

/// Cross-node merge state: one cursor per input and a heap over their
/// `current` records.
struct MergeEngine {
    cursors: Vec<MergeCursor>,
    heap: BinaryHeap<HeapEntry>,
    winners: u64,
    discarded: u64,
}

impl MergeEngine {
    fn new(cursors: Vec<MergeCursor>) -> Self {
        let heap = cursors
            .iter()
            .enumerate()
            .map(|(source, cursor)| HeapEntry {
                record: *cursor.current(),
                source,
            })
            .collect();
        Self {
            cursors,
            heap,
            winners: 0,
            discarded: 0,
        }
    }

    fn run(&mut self) -> Result<(), StreamError> {
        while let Some(top) = self.heap.pop() {
            self.cursors[top.source].emit()?;
            self.winners += 1;

            let mut touched = vec![top.source];
            while self
                .heap
                .peek()
                .is_some_and(|next| next.record.key == top.record.key)
            {
                if let Some(loser) = self.heap.pop() {
                    self.discarded += 1;
                    touched.push(loser.source);
                }
            }

            for source in touched {
                let cursor = &mut self.cursors[source];
                if cursor.advance()? {
                    self.heap.push(HeapEntry {
                        record: *cursor.current(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    fn into_outputs(self) -> Result<Vec<RecordStream>, StreamError> {
        self.cursors
            .into_iter()
            .map(MergeCursor::into_output)
            .collect()
    }
}

/// Merges per-node diff streams into deduplicated recovery queues under
/// `tmp_dir`, one `merge_<node>` stream per non-empty input, returned in
/// input order and persisted (`leave_file = true`).
///
/// Each distinct key lands in the output of exactly one node: the one whose
/// diff holds the highest-priority record for it (newest timestamp, then
/// largest size, then earliest input). A single non-empty input is copied
/// as-is; no non-empty input yields an empty result.
///
/// # Errors
///
/// Returns [`RecoveryError::DuplicateDestination`] if two non-empty inputs
/// belong to the same node, [`RecoveryError::OutputOverlapsInput`] if an
/// input file is one of the `merge_<node>` outputs (several inputs only), and
/// [`RecoveryError::Storage`] if an input is not sorted or any read or write
/// fails.
pub fn merge(diffs: &mut [RecordStream], tmp_dir: &Path) -> Result<Vec<RecordStream>, RecoveryError> {
    let mut inputs: Vec<&mut RecordStream> = diffs.iter_mut().filter(|d| !d.is_empty()).collect();

    let mut seen = HashSet::new();
    for input in &inputs {
        if !seen.insert(input.address().clone()) {
            return Err(RecoveryError::DuplicateDestination(input.address().clone()));
        }
        if !input.is_sorted() {
            return Err(StreamError::Unsorted {
                path: input.path().to_path_buf(),
            }
            .into());
        }
    }

    if inputs.is_empty() {
        tracing::debug!("nothing to merge");
        return Ok(Vec::new());
    }

    std::fs::create_dir_all(tmp_dir).map_err(|source| StreamError::Io {
        op: "merge",
        path: tmp_dir.to_path_buf(),
        source,
    })?;

    if let [only] = inputs.as_mut_slice() {
        // An input already sitting at its own output path is re-attached.
        let dest = tmp_dir.join(only.address().container_name("merge_"));
        let copy = only.copy_to(&dest)?;
        tracing::info!(
            address = %copy.address(),
            records = copy.len(),
            "single diff, copied without merging"
        );
        return Ok(vec![copy]);
    }

    let dests: Vec<PathBuf> = inputs
        .iter()
        .map(|input| tmp_dir.join(input.address().container_name("merge_")))
        .collect();
    for dest in &dests {
        if inputs.iter().any(|input| input.is_backed_by(dest)) {
            return Err(RecoveryError::OutputOverlapsInput(dest.clone()));
        }
    }

    let mut cursors = Vec::with_capacity(inputs.len());
    for (input, dest) in inputs.into_iter().zip(dests) {
        let mut output = RecordStream::create(dest, input.address().clone())?;
        output.set_leave_file(true);
        output.set_sort_chunk_records(input.sort_chunk_records());
        match MergeCursor::new(input, output)? {
            Some(cursor) => cursors.push(cursor),
            None => tracing::warn!(path = %input.path().display(), "diff emptied before merge"),
        }
    }

    let mut engine = MergeEngine::new(cursors);
    engine.run()?;
    tracing::info!(
        inputs = engine.cursors.len(),
        winners = engine.winners,
        discarded = engine.discarded,
        "merged diffs"
    );
    Ok(engine.into_outputs()?)
}
