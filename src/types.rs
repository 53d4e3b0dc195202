use serde::{Deserialize, Serialize};

// ── Input Types (emitted by the event source) ──

/// One keyed price update. Immutable once produced; consumed exactly once by
/// the coalescing buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    pub key: String,
    pub value: f64,
    pub change_pct: f64,
    pub volume: i64,
    /// Event time, unix milliseconds.
    pub timestamp: i64,
    pub id: String,
}

// ── Canonical State (owned by the flush scheduler) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    #[default]
    None,
}

impl Direction {
    /// Direction of `next` relative to `prev`. Equal values carry no flag.
    pub fn between(prev: f64, next: f64) -> Self {
        if next > prev {
            Direction::Up
        } else if next < prev {
            Direction::Down
        } else {
            Direction::None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Up => "▲",
            Direction::Down => "▼",
            Direction::None => " ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerState {
    pub key: String,
    pub value: f64,
    pub previous_value: f64,
    pub direction: Direction,
    pub change_pct: f64,
    pub volume: i64,
    /// Event time of the update that produced this state, unix milliseconds.
    pub timestamp: i64,
    /// Wall-clock time the state was last written, unix milliseconds.
    pub last_updated: i64,
}

// ── Derived / Observability Types ──

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleState {
    pub buffer_size: usize,
    pub throttle_level: f64,
    pub is_throttling: bool,
}

/// Session counters. Monotonic until an explicit reset.
///
/// At all times `received == rendered_total + coalesced_total + pending +
/// malformed_total`, where `pending` is the current buffer occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub received: u64,
    pub rendered_total: u64,
    pub coalesced_total: u64,
    pub malformed_total: u64,
    pub flushes: u64,
    pub skipped_flushes: u64,
}
