use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::error::FlowError;
use crate::types::{Direction, TickerState, UpdateEvent};

/// Minimum time a direction flag stays visible before decay clears it, ms.
pub const FLAG_DISPLAY_MS: i64 = 600;

/// Canonical key → state map. Keys are kept sorted so readers get a stable
/// display order without sorting on every frame.
#[derive(Debug, Default)]
pub struct TickerStore {
    tickers: BTreeMap<String, TickerState>,
    revision: u64,
}

impl TickerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&TickerState> {
        self.tickers.get(key)
    }

    /// Bumped on every mutation; lets readers skip re-snapshotting.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickerState> {
        self.tickers.values()
    }

    /// Owned copy of every ticker, ordered by key.
    pub fn ordered(&self) -> Vec<TickerState> {
        self.tickers.values().cloned().collect()
    }

    /// Write one update. The direction flag compares against the stored
    /// value; a first observation compares against itself and never flags.
    pub fn apply(&mut self, event: UpdateEvent, now_ms: i64) -> Result<(), FlowError> {
        if event.key.is_empty() {
            return Err(FlowError::MalformedEvent { id: event.id, reason: "missing key" });
        }
        if !event.value.is_finite() {
            return Err(FlowError::MalformedEvent { id: event.id, reason: "non-finite value" });
        }

        match self.tickers.get_mut(&event.key) {
            Some(state) => {
                state.previous_value = state.value;
                state.direction = Direction::between(state.value, event.value);
                state.value = event.value;
                state.change_pct = event.change_pct;
                state.volume = event.volume;
                state.timestamp = event.timestamp;
                state.last_updated = now_ms;
            }
            None => {
                let state = TickerState {
                    key: event.key.clone(),
                    value: event.value,
                    previous_value: event.value,
                    direction: Direction::None,
                    change_pct: event.change_pct,
                    volume: event.volume,
                    timestamp: event.timestamp,
                    last_updated: now_ms,
                };
                self.tickers.insert(event.key, state);
            }
        }

        self.revision += 1;
        Ok(())
    }

    /// Seed from an initial snapshot. Only keys not yet observed are
    /// created; state already written by a flush is left untouched.
    /// Snapshot entries never carry a flag. Returns how many keys were created.
    pub fn seed<I>(&mut self, events: I, now_ms: i64) -> usize
    where
        I: IntoIterator<Item = UpdateEvent>,
    {
        let mut seeded = 0;
        for event in events {
            if event.key.is_empty() || !event.value.is_finite() {
                continue;
            }
            if let Entry::Vacant(slot) = self.tickers.entry(event.key) {
                let key = slot.key().clone();
                slot.insert(TickerState {
                    key,
                    value: event.value,
                    previous_value: event.value,
                    direction: Direction::None,
                    change_pct: event.change_pct,
                    volume: event.volume,
                    timestamp: event.timestamp,
                    last_updated: now_ms,
                });
                seeded += 1;
            }
        }
        if seeded > 0 {
            self.revision += 1;
        }
        seeded
    }

    /// Clear direction flags that have been visible for at least
    /// `min_display_ms`. Returns the number of flags cleared.
    pub fn decay_flags(&mut self, now_ms: i64, min_display_ms: i64) -> usize {
        let mut cleared = 0;
        for state in self.tickers.values_mut() {
            if state.direction != Direction::None && now_ms - state.last_updated >= min_display_ms {
                state.direction = Direction::None;
                cleared += 1;
            }
        }
        if cleared > 0 {
            self.revision += 1;
        }
        cleared
    }
}
