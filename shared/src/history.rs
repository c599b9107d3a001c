//! Time-windowed history of input samples the client has already applied.
//!
//! Samples are appended in time order by the single prediction loop, so the
//! backing deque is always sorted by timestamp. Anything older than the
//! retention window is dropped lazily whenever the history is touched.

use crate::clock::Clock;
use crate::input::InputSample;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Must exceed the worst expected round-trip time, otherwise acknowledged
/// samples are evicted before their acknowledgment arrives.
pub const DEFAULT_RETENTION: Duration = Duration::from_millis(2000);

#[derive(Debug)]
pub struct InputHistory {
    samples: VecDeque<InputSample>,
    retention_ns: u64,
    clock: Arc<dyn Clock>,
}

impl InputHistory {
    pub fn new(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            samples: VecDeque::new(),
            retention_ns: u64::try_from(retention.as_nanos()).unwrap_or(u64::MAX),
            clock,
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_nanos(self.retention_ns)
    }

    /// Appends a sample stamped with its insertion time.
    pub fn insert(&mut self, sample: InputSample) {
        self.evict_expired();
        if let Some(last) = self.samples.back() {
            debug_assert!(
                last.timestamp_ns <= sample.timestamp_ns,
                "input history must be appended in time order"
            );
        }
        self.samples.push_back(sample);
    }

    /// Copies every retained sample with a timestamp strictly greater than
    /// `timestamp_ns`, oldest first.
    pub fn query_newer_than(&mut self, timestamp_ns: u64) -> Vec<InputSample> {
        self.evict_expired();
        let start = self
            .samples
            .partition_point(|sample| sample.timestamp_ns <= timestamp_ns);
        self.samples.range(start..).copied().collect()
    }

    pub fn most_recent(&mut self) -> Option<InputSample> {
        self.evict_expired();
        self.samples.back().copied()
    }

    pub fn size(&mut self) -> usize {
        self.evict_expired();
        self.samples.len()
    }

    fn evict_expired(&mut self) {
        let now = self.clock.now_ns();
        while let Some(oldest) = self.samples.front() {
            if now.saturating_sub(oldest.timestamp_ns) > self.retention_ns {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}
