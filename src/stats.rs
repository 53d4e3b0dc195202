use std::time::{Duration, Instant};

use serde::Serialize;

use crate::types::Counters;

pub const STATS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub received: u64,
    pub rendered_total: u64,
    pub coalesced_total: u64,
    pub malformed_total: u64,
    /// Events received per second over the last window.
    pub throughput: f64,
    /// Updates applied per second over the last window.
    pub render_rate: f64,
    pub efficiency_pct: f64,
    pub coalesce_rate_pct: f64,
}

/// `part / received` as a percentage; 100% before anything arrives.
pub fn ratio_pct(part: u64, received: u64) -> f64 {
    if received == 0 {
        100.0
    } else {
        part as f64 / received as f64 * 100.0
    }
}

/// Read-only consumer of `Counters`. Keeps only the previous sample so it
/// can turn cumulative counters into per-window rates.
#[derive(Debug)]
pub struct StatsAggregator {
    last_sample: Instant,
    last_received: u64,
    last_rendered: u64,
    latest: StatsSnapshot,
}

impl StatsAggregator {
    pub fn new(now: Instant) -> Self {
        Self { last_sample: now, last_received: 0, last_rendered: 0, latest: StatsSnapshot::default() }
    }

    pub fn latest(&self) -> StatsSnapshot {
        self.latest
    }

    /// Take a new sample. Cumulative figures come straight from `counters`;
    /// rates use the delta since the previous sample.
    pub fn sample(&mut self, now: Instant, counters: &Counters) -> StatsSnapshot {
        let elapsed = now.saturating_duration_since(self.last_sample).as_secs_f64();
        // Counters can go backwards across an explicit reset.
        let received_delta = counters.received.saturating_sub(self.last_received);
        let rendered_delta = counters.rendered_total.saturating_sub(self.last_rendered);

        let (throughput, render_rate) = if elapsed > 0.0 {
            (received_delta as f64 / elapsed, rendered_delta as f64 / elapsed)
        } else {
            (self.latest.throughput, self.latest.render_rate)
        };

        self.last_sample = now;
        self.last_received = counters.received;
        self.last_rendered = counters.rendered_total;
        self.latest = StatsSnapshot {
            received: counters.received,
            rendered_total: counters.rendered_total,
            coalesced_total: counters.coalesced_total,
            malformed_total: counters.malformed_total,
            throughput,
            render_rate,
            efficiency_pct: ratio_pct(counters.rendered_total, counters.received),
            coalesce_rate_pct: ratio_pct(counters.coalesced_total, counters.received),
        };
        self.latest
    }
}
