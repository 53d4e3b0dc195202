use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

const WINDOW_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub count: usize,
}

/// Rolling windows of the last `WINDOW_SIZE` samples for ingest and flush
/// durations (microseconds) and event age at application (milliseconds).
#[derive(Debug)]
pub struct LatencyTracker {
    ingest_us: VecDeque<u64>,
    flush_us: VecDeque<u64>,
    age_ms: VecDeque<u64>,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self {
            ingest_us: VecDeque::with_capacity(WINDOW_SIZE),
            flush_us: VecDeque::with_capacity(WINDOW_SIZE),
            age_ms: VecDeque::with_capacity(WINDOW_SIZE),
        }
    }

    pub fn reset(&mut self) {
        self.ingest_us.clear();
        self.flush_us.clear();
        self.age_ms.clear();
    }

    pub fn record_ingest(&mut self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        push_capped(&mut self.ingest_us, us);
    }

    pub fn record_flush(&mut self, us: u64) {
        push_capped(&mut self.flush_us, us);
    }

    pub fn record_age(&mut self, ms: u64) {
        push_capped(&mut self.age_ms, ms);
    }

    pub fn ingest_stats(&self) -> LatencyStats {
        compute_stats(&self.ingest_us)
    }

    pub fn flush_stats(&self) -> LatencyStats {
        compute_stats(&self.flush_us)
    }

    pub fn age_stats(&self) -> LatencyStats {
        compute_stats(&self.age_ms)
    }
}

fn push_capped(q: &mut VecDeque<u64>, val: u64) {
    if q.len() >= WINDOW_SIZE {
        q.pop_front();
    }
    q.push_back(val);
}

fn compute_stats(q: &VecDeque<u64>) -> LatencyStats {
    if q.is_empty() {
        return LatencyStats::default();
    }
    let mut sorted: Vec<u64> = q.iter().copied().collect();
    sorted.sort_unstable();
    let n = sorted.len();
    LatencyStats {
        p50: sorted[n * 50 / 100],
        p95: sorted[n * 95 / 100],
        p99: sorted[(n * 99 / 100).min(n - 1)],
        min: sorted[0],
        max: sorted[n - 1],
        count: n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_keeps_latest_samples() {
        let mut tracker = LatencyTracker::new();
        for ms in 0..(WINDOW_SIZE as u64 + 10) {
            tracker.record_age(ms);
        }
        let stats = tracker.age_stats();
        assert_eq!(stats.count, WINDOW_SIZE);
        assert_eq!(stats.min, 10);
        assert_eq!(stats.max, WINDOW_SIZE as u64 + 9);
    }
}
