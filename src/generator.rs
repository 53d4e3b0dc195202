use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::UpdateEvent;

pub const SYMBOLS: &[(&str, f64)] = &[
    ("AAPL", 150.0),
    ("GOOGL", 2800.0),
    ("MSFT", 420.0),
    ("AMZN", 185.0),
    ("TSLA", 250.0),
    ("NVDA", 880.0),
    ("META", 490.0),
    ("NFLX", 610.0),
];

pub const DEFAULT_TICKER_COUNT: usize = 500;

/// Chance that a burst is injected into a cycle when bursts are enabled.
const BURST_PROBABILITY: f64 = 0.1;
/// A burst adds this many times the cycle's normal volume.
const BURST_MULTIPLIER: usize = 5;
/// Number of keys a burst concentrates on.
const HOT_KEYS: usize = 5;

#[derive(Debug, Clone)]
struct Ticker {
    key: String,
    open: f64,
    price: f64,
}

/// Random-walk price source. Stands in for any real feed.
pub struct TickerGenerator {
    tickers: Vec<Ticker>,
    seq: u64,
    pub burst_enabled: bool,
    rng: StdRng,
}

impl TickerGenerator {
    pub fn new(ticker_count: usize) -> Self {
        Self::build(ticker_count, StdRng::from_entropy())
    }

    pub fn with_seed(ticker_count: usize, seed: u64) -> Self {
        Self::build(ticker_count, StdRng::seed_from_u64(seed))
    }

    fn build(ticker_count: usize, mut rng: StdRng) -> Self {
        let ticker_count = ticker_count.max(1);
        let mut tickers = Vec::with_capacity(ticker_count);
        for (sym, base) in SYMBOLS.iter().take(ticker_count) {
            tickers.push(Ticker { key: sym.to_string(), open: *base, price: *base });
        }
        let mut idx = 0;
        while tickers.len() < ticker_count {
            let key = synthetic_symbol(idx);
            idx += 1;
            if SYMBOLS.iter().any(|(sym, _)| *sym == key) {
                continue;
            }
            let base = rng.gen_range(5.0..500.0);
            tickers.push(Ticker { key, open: base, price: base });
        }
        Self { tickers, seq: 0, burst_enabled: false, rng }
    }

    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    pub fn ticker_count(&self) -> usize {
        self.tickers.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tickers.iter().map(|t| t.key.as_str())
    }

    /// Events for one emission cycle. With bursts enabled, occasionally adds
    /// a burst on a handful of hot keys on top of the normal volume.
    pub fn generate_cycle(&mut self, count: usize, ts: i64) -> Vec<UpdateEvent> {
        let mut events = self.generate(count, ts);
        if self.burst_enabled && count > 0 && self.rng.gen_bool(BURST_PROBABILITY) {
            let mut burst = self.inject_burst(count * (BURST_MULTIPLIER - 1), ts);
            events.append(&mut burst);
        }
        events
    }

    /// `count` updates on uniformly chosen keys.
    pub fn generate(&mut self, count: usize, ts: i64) -> Vec<UpdateEvent> {
        let mut events = Vec::with_capacity(count);
        for _ in 0..count {
            let idx = self.rng.gen_range(0..self.tickers.len());
            events.push(self.step(idx, ts));
        }
        events
    }

    fn inject_burst(&mut self, count: usize, ts: i64) -> Vec<UpdateEvent> {
        let hot: Vec<usize> = (0..HOT_KEYS.min(self.tickers.len()))
            .map(|_| self.rng.gen_range(0..self.tickers.len()))
            .collect();
        let mut events = Vec::with_capacity(count);
        for _ in 0..count {
            let idx = hot[self.rng.gen_range(0..hot.len())];
            events.push(self.step(idx, ts));
        }
        events
    }

    /// Current price of every ticker, for seeding a consumer.
    pub fn snapshot(&mut self, ts: i64) -> Vec<UpdateEvent> {
        let mut events = Vec::with_capacity(self.tickers.len());
        for idx in 0..self.tickers.len() {
            self.seq += 1;
            let ticker = &self.tickers[idx];
            events.push(UpdateEvent {
                key: ticker.key.clone(),
                value: ticker.price,
                change_pct: change_pct(ticker),
                volume: 0,
                timestamp: ts,
                id: format!("{}-{}", ticker.key, self.seq),
            });
        }
        events
    }

    fn step(&mut self, idx: usize, ts: i64) -> UpdateEvent {
        let drift = self.rng.gen_range(-0.005..0.005);
        let volume = self.rng.gen_range(10..5_000);
        self.seq += 1;

        let ticker = &mut self.tickers[idx];
        ticker.price = (ticker.price * (1.0 + drift)).max(0.01);
        UpdateEvent {
            key: ticker.key.clone(),
            value: ticker.price,
            change_pct: change_pct(ticker),
            volume,
            timestamp: ts,
            id: format!("{}-{}", ticker.key, self.seq),
        }
    }
}

fn change_pct(ticker: &Ticker) -> f64 {
    (ticker.price - ticker.open) / ticker.open * 100.0
}

/// Three-letter symbol for `idx`: AAA, AAB, ... ZZZ, then AAAA...
fn synthetic_symbol(idx: usize) -> String {
    let mut n = idx;
    let mut letters = Vec::new();
    for _ in 0..3 {
        letters.push((b'A' + (n % 26) as u8) as char);
        n /= 26;
    }
    while n > 0 {
        letters.push((b'A' + ((n - 1) % 26) as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tickers_are_unique() {
        let gen = TickerGenerator::with_seed(20_000, 7);
        let keys: HashSet<&str> = gen.keys().collect();
        assert_eq!(keys.len(), 20_000);
    }

    #[test]
    fn burst_only_when_enabled() {
        let mut gen = TickerGenerator::with_seed(50, 3);
        for _ in 0..100 {
            assert_eq!(gen.generate_cycle(10, 0).len(), 10);
        }
        gen.burst_enabled = true;
        let total: usize = (0..200).map(|_| gen.generate_cycle(10, 0).len()).sum();
        assert!(total > 2_000);
    }
}
