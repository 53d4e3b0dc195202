use std::collections::HashMap;

use tracing::warn;

use crate::types::{Counters, UpdateEvent};

/// Outcome of a single `ingest` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    pub coalesced: usize,
    pub malformed: usize,
}

/// Key → most recent unflushed event. Holds at most one entry per key.
#[derive(Debug, Default)]
pub struct CoalescingBuffer {
    pending: HashMap<String, UpdateEvent>,
}

impl CoalescingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { pending: HashMap::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&UpdateEvent> {
        self.pending.get(key)
    }

    /// Absorb a batch. Every event counts as received; a replacement of an
    /// existing pending entry counts as coalesced and the replaced event is
    /// never delivered. Events without a key are dropped as malformed.
    pub fn ingest<I>(&mut self, events: I, counters: &mut Counters) -> IngestReport
    where
        I: IntoIterator<Item = UpdateEvent>,
    {
        let mut report = IngestReport::default();

        for event in events {
            counters.received += 1;

            if event.key.is_empty() {
                warn!(id = %event.id, "dropping event without key");
                counters.malformed_total += 1;
                report.malformed += 1;
                continue;
            }

            if self.pending.insert(event.key.clone(), event).is_some() {
                counters.coalesced_total += 1;
                report.coalesced += 1;
            }
            report.accepted += 1;
        }

        report
    }

    /// Swap the pending map out for an empty one. Ingests after this call
    /// land in the fresh map and are not part of the returned batch. The
    /// fresh map starts unallocated, so a past burst does not size every
    /// later one.
    pub fn take(&mut self) -> HashMap<String, UpdateEvent> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(key: &str, value: f64) -> UpdateEvent {
        UpdateEvent {
            key: key.to_string(),
            value,
            change_pct: 0.0,
            volume: 1,
            timestamp: 0,
            id: format!("{key}-{value}"),
        }
    }

    #[test]
    fn take_leaves_buffer_empty() {
        let mut buffer = CoalescingBuffer::new();
        let mut counters = Counters::default();
        buffer.ingest(vec![event("A", 1.0), event("B", 2.0)], &mut counters);

        let drained = buffer.take();
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());

        assert_eq!(buffer.pending.capacity(), 0);

        buffer.ingest(vec![event("A", 3.0)], &mut counters);
        assert_eq!(buffer.get("A").map(|e| e.value), Some(3.0));
        assert_eq!(drained["A"].value, 1.0);
    }
}
