use crate::{
    IterationOptions, IterationService, IteratorElement, IteratorRequest, IteratorResponse,
    RecordSource,
};
use anyhow::Result;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use stream::{Address, Key, Record, RecordStream, Timestamp};

pub fn addr(port: u16) -> Address {
    Address::new("127.0.0.1", port, 1)
}

pub fn key(n: u64) -> Key {
    Key::from(n)
}

pub fn rec(key: u64, tsec: u64) -> Record {
    Record::new(Key::from(key), Timestamp::new(tsec, 0), 0, 0)
}

pub fn rec_sized(key: u64, tsec: u64, size: u64) -> Record {
    Record::new(Key::from(key), Timestamp::new(tsec, 0), size, 0)
}

pub fn stream_of(dir: &Path, name: &str, port: u16, records: &[Record]) -> Result<RecordStream> {
    let mut s = RecordStream::create(dir.join(name), addr(port))?;
    for r in records {
        s.append(r)?;
    }
    Ok(s)
}

pub fn collect(stream: &mut RecordStream) -> Result<Vec<Record>> {
    Ok(stream.iter()?.collect::<stream::Result<Vec<_>>>()?)
}

pub fn keys_and_ts(records: &[Record]) -> Vec<(Key, u64)> {
    records.iter().map(|r| (r.key, r.timestamp.tsec)).collect()
}

pub fn options(dir: &Path, batch_size: u64) -> IterationOptions {
    IterationOptions {
        tmp_dir: dir.to_path_buf(),
        batch_size,
        ..IterationOptions::default()
    }
}

// -------------------- Mock iteration service --------------------

/// One scripted step of a mock remote iteration.
#[derive(Debug, Clone)]
pub enum Step {
    Element(IteratorElement),
    Error(&'static str),
}

/// A record element reporting `iterated` / `total` remote counters.
pub fn element(record: Record, iterated: u64, total: u64) -> Step {
    Step::Element(IteratorElement {
        status: 0,
        response: IteratorResponse {
            status: 0,
            key: record.key,
            timestamp: record.timestamp,
            size: record.size,
            user_flags: record.user_flags,
            iterated_keys: iterated,
            total_keys: total,
        },
    })
}

/// A keepalive element: non-zero response status, no record.
pub fn keepalive(iterated: u64, total: u64) -> Step {
    Step::Element(IteratorElement {
        status: 0,
        response: IteratorResponse {
            status: 1,
            key: Key::MIN,
            timestamp: Timestamp::MIN,
            size: 0,
            user_flags: 0,
            iterated_keys: iterated,
            total_keys: total,
        },
    })
}

/// An element whose top-level status reports a failure.
pub fn failed(status: i32) -> Step {
    Step::Element(IteratorElement {
        status,
        response: IteratorResponse {
            status: 0,
            key: Key::MIN,
            timestamp: Timestamp::MIN,
            size: 0,
            user_flags: 0,
            iterated_keys: 0,
            total_keys: 0,
        },
    })
}

/// Records with increasing remote counters and a fixed total.
pub fn elements(records: &[Record]) -> Vec<Step> {
    let total = records.len() as u64;
    records
        .iter()
        .enumerate()
        .map(|(i, r)| element(*r, i as u64 + 1, total))
        .collect()
}

pub const MOCK_ELAPSED: Duration = Duration::from_millis(7);

struct MockSource {
    steps: std::vec::IntoIter<Step>,
}

impl Iterator for MockSource {
    type Item = Result<IteratorElement>;

    fn next(&mut self) -> Option<Self::Item> {
        self.steps.next().map(|step| match step {
            Step::Element(e) => Ok(e),
            Step::Error(msg) => Err(anyhow::anyhow!(msg)),
        })
    }
}

impl RecordSource for MockSource {
    fn elapsed_time(&self) -> Duration {
        MOCK_ELAPSED
    }
}

/// Replays a fixed script and remembers every request it receives.
pub struct MockService {
    steps: Vec<Step>,
    refuse: bool,
    pub requests: Mutex<Vec<IteratorRequest>>,
}

impl MockService {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            refuse: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A service whose `start_iterator` call itself fails.
    pub fn refusing() -> Self {
        Self {
            steps: Vec::new(),
            refuse: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl IterationService for MockService {
    fn start_iterator(&self, request: &IteratorRequest) -> Result<Box<dyn RecordSource>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if self.refuse {
            anyhow::bail!("connection refused");
        }
        Ok(Box::new(MockSource {
            steps: self.steps.clone().into_iter(),
        }))
    }
}
