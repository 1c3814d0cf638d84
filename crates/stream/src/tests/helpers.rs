use crate::{Address, Key, Record, RecordStream, Timestamp};
use anyhow::Result;
use std::path::Path;

pub fn addr(port: u16) -> Address {
    Address::new("127.0.0.1", port, 1)
}

pub fn rec(key: u64, tsec: u64) -> Record {
    Record::new(Key::from(key), Timestamp::new(tsec, 0), 0, 0)
}

pub fn rec_sized(key: u64, tsec: u64, size: u64) -> Record {
    Record::new(Key::from(key), Timestamp::new(tsec, 0), size, 0)
}

/// Creates a stream at `dir/name` holding `records` in the given order.
pub fn stream_of(dir: &Path, name: &str, port: u16, records: &[Record]) -> Result<RecordStream> {
    let mut s = RecordStream::create(dir.join(name), addr(port))?;
    for r in records {
        s.append(r)?;
    }
    Ok(s)
}

pub fn collect(stream: &mut RecordStream) -> Result<Vec<Record>> {
    Ok(stream.iter()?.collect::<crate::Result<Vec<_>>>()?)
}

pub fn keys_and_ts(records: &[Record]) -> Vec<(Key, u64)> {
    records.iter().map(|r| (r.key, r.timestamp.tsec)).collect()
}
