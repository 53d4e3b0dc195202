use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::ThrottleState;

/// Level above which flush cycles may be shed.
pub const SKIP_LEVEL: f64 = 0.5;
/// Skip probability per unit of throttle level above `SKIP_LEVEL`.
pub const SKIP_FACTOR: f64 = 0.5;

/// Throttle level for a buffer occupancy. Zero up to half the threshold,
/// then linear up to 1.0 at the threshold.
pub fn throttle_level(buffer_size: usize, threshold: usize) -> f64 {
    let half = threshold as f64 * 0.5;
    if half <= 0.0 {
        return if buffer_size > 0 { 1.0 } else { 0.0 };
    }
    ((buffer_size as f64 - half) / half).clamp(0.0, 1.0)
}

pub fn evaluate(buffer_size: usize, threshold: usize) -> ThrottleState {
    ThrottleState {
        buffer_size,
        throttle_level: throttle_level(buffer_size, threshold),
        is_throttling: buffer_size as f64 > threshold as f64 * 0.5,
    }
}

/// Probability that a cycle at `level` is skipped. Non-decreasing in `level`.
pub fn skip_probability(level: f64) -> f64 {
    if level > SKIP_LEVEL {
        (level * SKIP_FACTOR).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Randomized load shedding on top of `evaluate`. Each decision is
/// independent of previous cycles.
#[derive(Debug)]
pub struct BackpressureController {
    rng: StdRng,
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self::new()
    }
}

impl BackpressureController {
    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    /// Deterministic controller for tests and benchmarks.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    pub fn evaluate(&self, buffer_size: usize, threshold: usize) -> ThrottleState {
        evaluate(buffer_size, threshold)
    }

    pub fn should_skip(&mut self, state: &ThrottleState) -> bool {
        let p = skip_probability(state.throttle_level);
        p > 0.0 && self.rng.gen_bool(p)
    }
}
