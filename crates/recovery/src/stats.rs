use std::collections::BTreeMap;

/// Write-only sink for named progress counters.
pub trait StatsSink {
    fn set_counter(&mut self, name: &str, value: u64);
}

/// In-memory [`StatsSink`] keeping the last value written per counter.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CounterStats {
    counters: BTreeMap<String, u64>,
}

impl CounterStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    /// Counters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl StatsSink for CounterStats {
    fn set_counter(&mut self, name: &str, value: u64) {
        self.counters.insert(name.to_string(), value);
    }
}
