use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

/// Issues partition keys of the form `YYYY/MM/DD/HH/<millis:013>-<seq:06>`.
///
/// Keys never go backwards for one clock even if the wall clock does, and
/// two batches sealed in the same millisecond get distinct sequence suffixes.
#[derive(Debug, Default)]
pub struct PartitionClock {
    last: Mutex<Option<(i64, u32)>>,
}

impl PartitionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_key(&self, at: DateTime<Utc>) -> String {
        let mut last = self.last.lock();
        let requested = at.timestamp_millis();

        let (millis, seq) = match *last {
            Some((prev, seq)) if requested <= prev => (prev, seq + 1),
            _ => (requested, 0),
        };
        *last = Some((millis, seq));

        let bucket = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or(at);
        format!("{}/{millis:013}-{seq:06}", bucket.format("%Y/%m/%d/%H"))
    }
}
