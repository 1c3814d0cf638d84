//! Two-way diff between sorted streams: the anti-entropy primitive.

use sha2::{Digest, Sha256};

use crate::error::{Result, StreamError};
use crate::record::{Address, Record};
use crate::stream::RecordStream;

/// Hex SHA-256 of an address, used to build collision-free diff file names.
fn address_digest(address: &Address) -> String {
    hex::encode(Sha256::digest(address.to_string().as_bytes()))
}

/// File name of the diff between a source node and a candidate node.
#[must_use]
pub fn diff_file_name(source: &Address, candidate: &Address) -> String {
    format!(
        "diff_{}-{}",
        address_digest(source),
        address_digest(candidate)
    )
}

impl RecordStream {
    /// Computes what `other` is missing relative to `self`.
    ///
    /// `self` is the reference (source) snapshot, `other` the candidate
    /// replica. The result holds every record of `self` whose key is absent
    /// from `other`, or present in `other` only with an older timestamp than
    /// `other`'s newest record for that key. Records where `other` is equally
    /// new or newer are left out.
    ///
    /// The result is sorted, is bound to `other`'s address (it lists what that
    /// node needs), and lives in `self`'s directory under
    /// [`diff_file_name`]. Both inputs are walked once, in lockstep.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Unsorted`] if either input is not known to be
    /// sorted, or a storage error if reading or writing fails.
    pub fn diff(&mut self, other: &mut RecordStream) -> Result<RecordStream> {
        for stream in [&*self, &*other] {
            if !stream.sorted {
                return Err(StreamError::Unsorted {
                    path: stream.path.clone(),
                });
            }
        }

        let name = diff_file_name(&self.address, &other.address);
        let path = self.path.with_file_name(name);
        let mut out = RecordStream::create(&path, other.address.clone())?;
        out.sort_chunk_records = self.sort_chunk_records;

        let mut theirs = other.iter()?;
        let mut their_head: Option<Record> = theirs.next().transpose()?;

        for mine in self.iter()? {
            let mine = mine?;

            // Skip candidate keys the source does not have.
            while let Some(head) = their_head {
                if head.key >= mine.key {
                    break;
                }
                their_head = theirs.next().transpose()?;
            }

            // `head` is the candidate's newest record for this key, since
            // equal keys are ordered newest first.
            let missing_or_stale = match their_head {
                Some(head) if head.key == mine.key => mine.timestamp > head.timestamp,
                _ => true,
            };
            if missing_or_stale {
                out.append_winner(&mine)?;
            }
        }
        out.flush()?;

        tracing::debug!(
            source = %self.address,
            candidate = %other.address,
            source_records = self.len,
            candidate_records = other.len,
            diff_records = out.len,
            "computed diff"
        );
        Ok(out)
    }
}
