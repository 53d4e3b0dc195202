use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ticker_flow::backpressure::BackpressureController;
use ticker_flow::buffer::CoalescingBuffer;
use ticker_flow::config::StreamConfig;
use ticker_flow::generator::TickerGenerator;
use ticker_flow::latency::LatencyTracker;
use ticker_flow::scheduler::{FlushScheduler, FlushTargets};
use ticker_flow::store::TickerStore;
use ticker_flow::types::Counters;
use ticker_flow::window::{visible_range, DEFAULT_OVERSCAN};

fn ingest_throughput(c: &mut Criterion) {
    let mut gen = TickerGenerator::with_seed(500, 1);

    let mut group = c.benchmark_group("ingest_throughput");
    for size in [100, 1000, 10_000, 50_000] {
        let events = gen.generate(size, TickerGenerator::now_ms());
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &events, |b, events| {
            b.iter(|| {
                let mut buffer = CoalescingBuffer::new();
                let mut counters = Counters::default();
                buffer.ingest(events.iter().cloned(), &mut counters);
                black_box(buffer.len())
            });
        });
    }
    group.finish();
}

fn flush_cycle(c: &mut Criterion) {
    let config = StreamConfig { throttle_threshold: usize::MAX / 4, ..StreamConfig::default() };

    let mut group = c.benchmark_group("flush_cycle");
    for tickers in [100, 1000, 10_000] {
        let mut gen = TickerGenerator::with_seed(tickers, 2);
        group.throughput(Throughput::Elements(tickers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tickers), &tickers, |b, &tickers| {
            let mut buffer = CoalescingBuffer::with_capacity(tickers);
            let mut store = TickerStore::new();
            let mut counters = Counters::default();
            let mut latency = LatencyTracker::new();
            b.iter(|| {
                let now_ms = TickerGenerator::now_ms();
                buffer.ingest(gen.generate(tickers * 2, now_ms), &mut counters);

                let mut scheduler = FlushScheduler::new(BackpressureController::with_seed(3));
                let now = Instant::now();
                scheduler.start(now);
                let outcome = scheduler.tick(
                    now,
                    now_ms,
                    &config,
                    FlushTargets {
                        buffer: &mut buffer,
                        store: &mut store,
                        counters: &mut counters,
                        latency: &mut latency,
                    },
                );
                black_box(outcome)
            });
        });
    }
    group.finish();
}

fn window_math(c: &mut Criterion) {
    c.bench_function("visible_range", |b| {
        let mut offset = 0u64;
        b.iter(|| {
            offset = (offset + 37) % 1_000_000;
            black_box(visible_range(black_box(offset), 24, 600, 1_000_000, DEFAULT_OVERSCAN))
        });
    });
}

criterion_group!(benches, ingest_throughput, flush_cycle, window_math);
criterion_main!(benches);
