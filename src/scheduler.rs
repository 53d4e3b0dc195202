//! Flush scheduler.
//!
//! A cooperative state machine driven by its owner: the owner sleeps until
//! [`FlushScheduler::next_wake`] and then calls [`FlushScheduler::tick`].
//! Every path through `tick` either re-arms exactly one wake or leaves the
//! scheduler `Idle`.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::backpressure::BackpressureController;
use crate::buffer::CoalescingBuffer;
use crate::config::StreamConfig;
use crate::error::FlowError;
use crate::latency::LatencyTracker;
use crate::store::TickerStore;
use crate::types::{Counters, ThrottleState};

/// One display refresh. Shed cycles retry after this delay.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled { wake_at: Instant },
    Flushing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub applied: usize,
    pub malformed: usize,
    pub duration_us: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Idle, or woken before the armed deadline. Nothing changed.
    NotDue,
    /// Load shedding dropped this cycle.
    Skipped(ThrottleState),
    /// Minimum inter-flush interval not yet reached.
    Deferred { remaining: Duration },
    /// Nothing buffered.
    Empty,
    Flushed(FlushReport),
    /// No wake could be armed; the scheduler is now idle.
    Halted,
}

/// State owned by the flush loop besides the buffer and store.
pub struct FlushTargets<'a> {
    pub buffer: &'a mut CoalescingBuffer,
    pub store: &'a mut TickerStore,
    pub counters: &'a mut Counters,
    pub latency: &'a mut LatencyTracker,
}

#[derive(Debug)]
pub struct FlushScheduler {
    state: SchedulerState,
    last_flush: Option<Instant>,
    throttle: ThrottleState,
    controller: BackpressureController,
}

impl FlushScheduler {
    pub fn new(controller: BackpressureController) -> Self {
        Self {
            state: SchedulerState::Idle,
            last_flush: None,
            throttle: ThrottleState::default(),
            controller,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn throttle(&self) -> ThrottleState {
        self.throttle
    }

    pub fn is_active(&self) -> bool {
        self.state != SchedulerState::Idle
    }

    pub fn next_wake(&self) -> Option<Instant> {
        match self.state {
            SchedulerState::Scheduled { wake_at } => Some(wake_at),
            _ => None,
        }
    }

    /// Arm an immediate wake. No-op if already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.is_active() {
            return false;
        }
        self.last_flush = None;
        self.state = SchedulerState::Scheduled { wake_at: now };
        true
    }

    /// Cancel the pending wake. Idempotent.
    pub fn stop(&mut self) -> bool {
        let was_active = self.is_active();
        self.state = SchedulerState::Idle;
        was_active
    }

    pub fn tick(
        &mut self,
        now: Instant,
        now_ms: i64,
        config: &StreamConfig,
        mut targets: FlushTargets<'_>,
    ) -> TickOutcome {
        match self.state {
            SchedulerState::Scheduled { wake_at } if now >= wake_at => {}
            _ => return TickOutcome::NotDue,
        }
        let interval = config.buffer_interval();

        // (a) load evaluation and shedding
        self.throttle = self.controller.evaluate(targets.buffer.len(), config.throttle_threshold);
        if self.controller.should_skip(&self.throttle) {
            targets.counters.skipped_flushes += 1;
            trace!(level = self.throttle.throttle_level, "flush cycle shed");
            return self.reschedule(now, FRAME_INTERVAL, interval, TickOutcome::Skipped(self.throttle));
        }

        // (b) minimum interval since the last successful flush
        if let Some(last) = self.last_flush {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < interval {
                let remaining = interval - elapsed;
                trace!(?remaining, "flush deferred");
                return self.reschedule(now, remaining, interval, TickOutcome::Deferred { remaining });
            }
        }

        // (c) nothing to do
        if targets.buffer.is_empty() {
            return self.reschedule(now, interval, interval, TickOutcome::Empty);
        }

        // (d) swap and apply
        self.state = SchedulerState::Flushing;
        let report = flush(now_ms, &mut targets);
        self.last_flush = Some(now);
        self.throttle = self.controller.evaluate(targets.buffer.len(), config.throttle_threshold);
        debug!(
            applied = report.applied,
            malformed = report.malformed,
            duration_us = report.duration_us,
            "flushed"
        );
        self.reschedule(now, interval, interval, TickOutcome::Flushed(report))
    }

    /// Arm the next wake `delay` from `now`, retrying once with `fallback`.
    fn reschedule(&mut self, now: Instant, delay: Duration, fallback: Duration, outcome: TickOutcome) -> TickOutcome {
        match self.arm(now, delay) {
            Ok(()) => outcome,
            Err(err) => {
                warn!(%err, "wake failed, retrying once");
                match self.arm(now, fallback) {
                    Ok(()) => outcome,
                    Err(err) => {
                        warn!(%err, "wake retry failed, scheduler idle");
                        self.state = SchedulerState::Idle;
                        TickOutcome::Halted
                    }
                }
            }
        }
    }

    fn arm(&mut self, now: Instant, delay: Duration) -> Result<(), FlowError> {
        let wake_at = now.checked_add(delay).ok_or(FlowError::WakeUnavailable {
            delay_ms: delay.as_millis().min(u64::MAX as u128) as u64,
        })?;
        self.state = SchedulerState::Scheduled { wake_at };
        Ok(())
    }
}

fn flush(now_ms: i64, targets: &mut FlushTargets<'_>) -> FlushReport {
    let started = Instant::now();
    let batch = targets.buffer.take();
    let mut report = FlushReport::default();

    for (_, event) in batch {
        let age_ms = now_ms.saturating_sub(event.timestamp).max(0) as u64;
        match targets.store.apply(event, now_ms) {
            Ok(()) => {
                report.applied += 1;
                targets.latency.record_age(age_ms);
            }
            Err(err) => {
                warn!(%err, "dropping update");
                report.malformed += 1;
            }
        }
    }

    targets.counters.rendered_total += report.applied as u64;
    targets.counters.malformed_total += report.malformed as u64;
    targets.counters.flushes += 1;

    report.duration_us = started.elapsed().as_micros() as u64;
    targets.latency.record_flush(report.duration_us);
    report
}
