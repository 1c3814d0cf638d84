//! Remote iteration driver.
//!
//! Drives one metadata collection against one node: asks the remote
//! iteration service for every key in a set of ranges and timestamp window,
//! routes each returned record into its partition's [`RecordStream`], and
//! reports progress along the way.
//!
//! The session is split in two phases: [`IterationSession`] is an iterator of
//! [`Progress`] snapshots (pull it to make progress, drop it to cancel), and
//! [`IterationSession::finish`] yields the terminal outcome.
//!
//! ```text
//! NotStarted ──first pull──▶ Iterating ──end of input──▶ Completed(outcome)
//!      │                         │
//!      └──────── any error ──────┴──────────────────────▶ Failed (None)
//! ```

use std::collections::BTreeMap;
use std::ops::BitOr;
use std::path::PathBuf;
use std::time::Duration;

use config::RecoveryConfig;
use stream::{Address, Key, Record, RecordStream, Timestamp};

use crate::range::{KeyRange, KeyRangeRouter};
use crate::stats::StatsSink;
use crate::RecoveryError;

/// Where the remote node reads its keys from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorType {
    /// Local disk iteration on the remote node (not supported here).
    Disk,
    /// Network iteration streaming records back to the caller.
    Network,
}

/// Iterator request flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IteratorFlags(u64);

impl IteratorFlags {
    pub const NONE: Self = Self(0);
    /// Stream payloads along with metadata.
    pub const DATA: Self = Self(1 << 0);
    /// Restrict iteration to the requested key ranges.
    pub const KEY_RANGE: Self = Self(1 << 1);
    /// Restrict iteration to the requested timestamp window.
    pub const TS_RANGE: Self = Self(1 << 2);

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for IteratorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// What the driver asks of the remote iteration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorRequest {
    pub address: Address,
    /// Id the iteration is started against.
    pub eid: Key,
    /// Key ranges in the service's native `(start, end)` form.
    pub ranges: Vec<(Key, Key)>,
    pub itype: IteratorType,
    pub flags: IteratorFlags,
    /// Inclusive `[min, max]` timestamp filter, applied server-side.
    pub timestamp_range: (Timestamp, Timestamp),
}

/// Per-record payload of an iterator element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IteratorResponse {
    /// Non-zero for keepalive elements, which carry no record.
    pub status: i32,
    pub key: Key,
    pub timestamp: Timestamp,
    pub size: u64,
    pub user_flags: u64,
    /// Keys the remote node has walked so far.
    pub iterated_keys: u64,
    /// Keys the remote node holds in total.
    pub total_keys: u64,
}

impl IteratorResponse {
    #[must_use]
    pub fn record(&self) -> Record {
        Record::new(self.key, self.timestamp, self.size, self.user_flags)
    }
}

/// One element of the remote iteration sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IteratorElement {
    /// Top-level status; non-zero aborts the session.
    pub status: i32,
    pub response: IteratorResponse,
}

/// Lazy, finite sequence of iterator elements from a remote node.
pub trait RecordSource: Iterator<Item = anyhow::Result<IteratorElement>> + Send {
    /// Wall-clock time the remote iteration took. Meaningful once the
    /// sequence is exhausted.
    fn elapsed_time(&self) -> Duration;
}

/// The remote iteration service.
pub trait IterationService {
    /// Starts an iteration and returns its element sequence.
    fn start_iterator(&self, request: &IteratorRequest) -> anyhow::Result<Box<dyn RecordSource>>;
}

/// `(filtered, iterated, total)` key counts at one point of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Records actually returned (keepalives excluded).
    pub filtered_keys: u64,
    /// Keys the remote node has walked.
    pub iterated_keys: u64,
    /// Keys the remote node holds.
    pub total_keys: u64,
}

/// Parameters of one collection session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationOptions {
    pub eid: Key,
    pub itype: IteratorType,
    pub flags: IteratorFlags,
    pub key_ranges: Vec<KeyRange>,
    pub timestamp_range: (Timestamp, Timestamp),
    /// Directory for the per-partition backing files.
    pub tmp_dir: PathBuf,
    /// Keep the result files after their streams are dropped.
    pub leave_file: bool,
    /// Elements between two progress reports.
    pub batch_size: u64,
    pub sort_chunk_records: usize,
}

impl Default for IterationOptions {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

impl IterationOptions {
    /// Whole key space, full timestamp window, metadata-only network
    /// iteration, with directory and sizes taken from `config`.
    #[must_use]
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            eid: Key::MIN,
            itype: IteratorType::Network,
            flags: IteratorFlags::KEY_RANGE | IteratorFlags::TS_RANGE,
            key_ranges: vec![KeyRange::whole(0)],
            timestamp_range: (Timestamp::MIN, Timestamp::MAX),
            tmp_dir: config.tmp_dir.clone(),
            leave_file: config.leave_file,
            batch_size: config.batch_size,
            sort_chunk_records: config.sort_chunk_records,
        }
    }
}

/// Records collected by a successful session.
#[derive(Debug)]
pub enum Collected {
    /// Single-partition mode: one stream for everything.
    Whole(RecordStream),
    /// One stream per partition id, plus the catch-all stream for keys no
    /// range claimed (only created if such a key arrived).
    Partitioned {
        streams: BTreeMap<u32, RecordStream>,
        unrouted: Option<RecordStream>,
    },
}

impl Collected {
    /// Records collected across every stream, catch-all included.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Collected::Whole(s) => s.len(),
            Collected::Partitioned { streams, unrouted } => {
                streams.values().map(RecordStream::len).sum::<u64>()
                    + unrouted.as_ref().map_or(0, RecordStream::len)
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Terminal result of a successful session.
#[derive(Debug)]
pub struct IterationOutcome {
    pub collected: Collected,
    /// Final progress snapshot.
    pub progress: Progress,
    /// Records whose key fell outside every configured range.
    pub unrouted_keys: u64,
    /// Remote iteration time as reported by the service.
    pub elapsed: Duration,
}

/// Lifecycle of an [`IterationSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Iterating,
    Completed,
    Failed,
}

/// Starts collection sessions against one node.
pub struct IterationDriver<S> {
    service: S,
    address: Address,
    separately: bool,
}

impl<S: IterationService> IterationDriver<S> {
    /// `separately` selects one result stream per key range instead of a
    /// single stream for the whole request.
    pub fn new(service: S, address: Address, separately: bool) -> Self {
        Self {
            service,
            address,
            separately,
        }
    }

    /// Same as [`new`](Self::new) with `separately` taken from `config`.
    pub fn from_config(service: S, address: Address, config: &RecoveryConfig) -> Self {
        Self::new(service, address, config.separately)
    }

    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Validates `options` and prepares a session. Nothing touches the
    /// network or the disk until the session is first pulled.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::InvalidRequest`] for a non-network iterator,
    /// a payload (`DATA`) request, no key ranges, or a zero batch size, and
    /// [`RecoveryError::InvalidRanges`] if the ranges cannot be routed.
    pub fn start(&self, options: IterationOptions) -> Result<IterationSession<'_, S>, RecoveryError> {
        if options.itype != IteratorType::Network {
            return Err(RecoveryError::InvalidRequest(
                "only network iterator is supported",
            ));
        }
        if options.flags.contains(IteratorFlags::DATA) {
            return Err(RecoveryError::InvalidRequest(
                "only metadata iterator is supported",
            ));
        }
        if options.key_ranges.is_empty() {
            return Err(RecoveryError::InvalidRequest(
                "there should be at least one iteration range",
            ));
        }
        if options.batch_size == 0 {
            return Err(RecoveryError::InvalidRequest("batch size must be non-zero"));
        }
        let router = KeyRangeRouter::new(options.key_ranges.clone(), self.separately)?;

        Ok(IterationSession {
            driver: self,
            options,
            router,
            state: SessionState::NotStarted,
            source: None,
            streams: BTreeMap::new(),
            unrouted: None,
            elements: 0,
            unrouted_keys: 0,
            progress: Progress::default(),
            outcome: None,
        })
    }

    /// Runs a session to completion, mirroring every progress snapshot into
    /// `stats` as `filtered_keys`, `iterated_keys` and `total_keys` (plus
    /// `unrouted_keys` at the end).
    ///
    /// Returns the outcome (`None` if the session failed) and the number of
    /// records returned by the node.
    ///
    /// # Errors
    ///
    /// Only validation errors from [`start`](IterationDriver::start).
    pub fn iterate_with_stats(
        &self,
        options: IterationOptions,
        stats: &mut dyn StatsSink,
    ) -> Result<(Option<IterationOutcome>, u64), RecoveryError> {
        let mut session = self.start(options)?;
        let mut result_len = 0;
        for progress in session.by_ref() {
            result_len = progress.filtered_keys;
            stats.set_counter("filtered_keys", progress.filtered_keys);
            stats.set_counter("iterated_keys", progress.iterated_keys);
            stats.set_counter("total_keys", progress.total_keys);
        }
        let outcome = session.finish();
        if let Some(outcome) = &outcome {
            stats.set_counter("unrouted_keys", outcome.unrouted_keys);
        }
        Ok((outcome, result_len))
    }
}

/// One in-flight collection. Pull it for [`Progress`], then call
/// [`finish`](IterationSession::finish) for the result.
///
/// Dropping an unfinished session cancels it. Streams created with
/// `leave_file` keep their partial (valid, unsorted) files for inspection;
/// the rest are removed.
pub struct IterationSession<'a, S> {
    driver: &'a IterationDriver<S>,
    options: IterationOptions,
    router: KeyRangeRouter,
    state: SessionState,
    source: Option<Box<dyn RecordSource>>,
    streams: BTreeMap<u32, RecordStream>,
    unrouted: Option<RecordStream>,
    /// Elements received, keepalives included.
    elements: u64,
    unrouted_keys: u64,
    progress: Progress,
    outcome: Option<IterationOutcome>,
}

impl<S: IterationService> IterationSession<'_, S> {
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Latest progress snapshot.
    #[must_use]
    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Drives any remaining input and returns the outcome, or `None` if the
    /// session failed. Failures have already been logged.
    pub fn finish(mut self) -> Option<IterationOutcome> {
        while self.next().is_some() {}
        self.outcome.take()
    }

    /// Opens the destination streams and asks the service for records.
    fn begin(&mut self) -> anyhow::Result<()> {
        let driver = self.driver;
        let address = &driver.address;
        std::fs::create_dir_all(&self.options.tmp_dir)?;

        for id in self.router.partition_ids() {
            let name = if self.router.is_partitioned() {
                address.container_name(&format!("iterator_{}_", id))
            } else {
                address.container_name("iterator_")
            };
            let stream = self.open_stream(name)?;
            self.streams.insert(id, stream);
        }

        let request = IteratorRequest {
            address: address.clone(),
            eid: self.options.eid,
            ranges: self.router.ranges().iter().map(KeyRange::to_native).collect(),
            itype: self.options.itype,
            flags: self.options.flags,
            timestamp_range: self.options.timestamp_range,
        };
        self.source = Some(driver.service.start_iterator(&request)?);
        self.state = SessionState::Iterating;
        tracing::debug!(
            address = %address,
            ranges = request.ranges.len(),
            partitions = self.streams.len(),
            "iteration started"
        );
        Ok(())
    }

    fn open_stream(&self, name: String) -> anyhow::Result<RecordStream> {
        let mut stream = RecordStream::create(
            self.options.tmp_dir.join(name),
            self.driver.address.clone(),
        )?;
        stream.set_leave_file(self.options.leave_file);
        stream.set_sort_chunk_records(self.options.sort_chunk_records);
        Ok(stream)
    }

    /// Consumes elements up to the next progress report.
    fn step(&mut self) -> anyhow::Result<Option<Progress>> {
        loop {
            let next = match self.source.as_mut() {
                Some(source) => source.next(),
                None => return Ok(None),
            };
            let Some(element) = next else {
                return self.complete().map(Some);
            };

            let element = element?;
            if element.status != 0 {
                return Err(RecoveryError::IterationStatus(element.status).into());
            }

            let response = &element.response;
            self.elements += 1;
            self.progress.iterated_keys = self.progress.iterated_keys.max(response.iterated_keys);
            self.progress.total_keys = self.progress.total_keys.max(response.total_keys);

            // Keepalives only move the counters.
            if response.status == 0 {
                self.progress.filtered_keys += 1;
                self.store(response.record())?;
            }

            if self.elements % self.options.batch_size == 0 {
                return Ok(Some(self.progress));
            }
        }
    }

    fn store(&mut self, record: Record) -> anyhow::Result<()> {
        if let Some(stream) = self
            .router
            .route(&record.key)
            .and_then(|id| self.streams.get_mut(&id))
        {
            stream.append(&record)?;
            return Ok(());
        }

        self.unrouted_keys += 1;
        if self.unrouted.is_none() {
            tracing::warn!(
                address = %self.driver.address,
                key = %record.key,
                "key outside every iteration range, diverting to catch-all stream"
            );
            let name = self.driver.address.container_name("iterator_unrouted_");
            self.unrouted = Some(self.open_stream(name)?);
        } else {
            tracing::debug!(key = %record.key, "unrouted key");
        }
        if let Some(stream) = self.unrouted.as_mut() {
            stream.append(&record)?;
        }
        Ok(())
    }

    /// End of input: flush every stream and assemble the outcome.
    fn complete(&mut self) -> anyhow::Result<Progress> {
        let elapsed = self
            .source
            .take()
            .map_or(Duration::ZERO, |source| source.elapsed_time());

        let mut streams = std::mem::take(&mut self.streams);
        let mut unrouted = self.unrouted.take();
        for stream in streams.values_mut().chain(unrouted.as_mut()) {
            stream.flush()?;
        }

        let collected = if self.router.is_partitioned() {
            Collected::Partitioned { streams, unrouted }
        } else {
            match streams.remove(&0) {
                Some(stream) => Collected::Whole(stream),
                None => anyhow::bail!("single-partition stream missing"),
            }
        };

        tracing::debug!(
            address = %self.driver.address,
            tsec = elapsed.as_secs(),
            tnsec = elapsed.subsec_nanos(),
            "time spent for iterator"
        );
        tracing::info!(
            address = %self.driver.address,
            filtered_keys = self.progress.filtered_keys,
            iterated_keys = self.progress.iterated_keys,
            total_keys = self.progress.total_keys,
            unrouted_keys = self.unrouted_keys,
            "iteration completed"
        );

        self.outcome = Some(IterationOutcome {
            collected,
            progress: self.progress,
            unrouted_keys: self.unrouted_keys,
            elapsed,
        });
        self.state = SessionState::Completed;
        Ok(self.progress)
    }

    fn fail(&mut self, err: anyhow::Error) {
        tracing::error!(
            address = %self.driver.address,
            error = %format!("{:#}", err),
            "iteration failed"
        );
        self.source = None;
        self.streams.clear();
        self.unrouted = None;
        self.outcome = None;
        self.state = SessionState::Failed;
    }
}

impl<S: IterationService> Iterator for IterationSession<'_, S> {
    type Item = Progress;

    fn next(&mut self) -> Option<Progress> {
        match self.state {
            SessionState::Completed | SessionState::Failed => return None,
            SessionState::NotStarted => {
                if let Err(e) = self.begin() {
                    self.fail(e);
                    return None;
                }
            }
            SessionState::Iterating => {}
        }

        match self.step() {
            Ok(progress) => progress,
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }
}
