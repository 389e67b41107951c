//! Tally of completed experiments per target location, dumped when
//! profiling stops. Purely informational; the CSV rows are the real output.

use std::collections::BTreeMap;

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct HitTally {
    counts: Mutex<BTreeMap<(String, i32, i32), u64>>,
}

impl HitTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, class: &str, line: i32, bci: i32) {
        let mut counts = self.counts.lock();
        *counts.entry((class.to_string(), line, bci)).or_insert(0) += 1;
    }

    /// Formats the tally, one line per distinct target location.
    pub fn dump(&self) -> Vec<String> {
        self.counts
            .lock()
            .iter()
            .map(|((class, line, bci), count)| {
                format!("{class}:{line} [bci: {bci}] experiments: {count}")
            })
            .collect()
    }
}
