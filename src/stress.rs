use std::time::{Duration, Instant};

use crate::config::{ConfigPatch, StreamConfig};
use crate::pipeline::{self, CoreView};

const LEVELS: &[u32] = &[1_000, 5_000, 10_000, 25_000, 50_000, 100_000, 200_000];
const SAMPLE_EVERY: Duration = Duration::from_millis(100);

struct LevelResult {
    level: usize,
    target_eps: u32,
    received_per_sec: u64,
    rendered_per_sec: u64,
    coalesce_pct: f64,
    peak_throttle: f64,
    peak_pending: usize,
    skipped_flushes: u64,
    flushes: u64,
    flush_p99: u64,
    age_p99: u64,
    duration_secs: f64,
}

pub async fn run(
    base: StreamConfig,
    ticker_count: usize,
    level_duration: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let total_time = LEVELS.len() as u64 * level_duration;
    println!("=== STRESS TEST ===");
    println!(
        "Levels: {}, Duration per level: {}s, Total estimated: {}s, Tickers: {}, Threshold: {}, Interval: {}ms",
        LEVELS.len(),
        level_duration,
        total_time,
        ticker_count,
        base.throttle_threshold,
        base.buffer_interval_ms,
    );
    println!();

    let handle = pipeline::spawn(base, ticker_count);
    handle.request_snapshot().await?;
    handle.start().await?;

    let level_dur = Duration::from_secs(level_duration);
    let mut results: Vec<LevelResult> = Vec::new();

    for (idx, &target_eps) in LEVELS.iter().enumerate() {
        let level_num = idx + 1;
        print!("Level {}/{}: target {} events/sec ... ", level_num, LEVELS.len(), target_eps);

        handle
            .configure(ConfigPatch { events_per_second: Some(target_eps as i64), ..Default::default() })
            .await?;
        handle.reset_stats().await?;

        let mut peak_throttle = 0.0f64;
        let mut peak_pending = 0usize;
        let level_start = Instant::now();

        while level_start.elapsed() < level_dur {
            tokio::time::sleep(SAMPLE_EVERY).await;
            let view = handle.view();
            peak_throttle = peak_throttle.max(view.throttle.throttle_level);
            peak_pending = peak_pending.max(view.pending);
        }

        let elapsed = level_start.elapsed().as_secs_f64();
        let view = handle.view();
        let result = summarize(level_num, target_eps, &view, elapsed, peak_throttle, peak_pending);

        println!(
            "{} received/s, {} rendered/s (flush p99={}us)",
            result.received_per_sec, result.rendered_per_sec, result.flush_p99
        );
        results.push(result);
    }

    handle.stop().await?;
    handle.shutdown().await;

    println!();
    print_results_table(&results);
    print_saturation_analysis(&results);
    Ok(())
}

fn summarize(
    level: usize,
    target_eps: u32,
    view: &CoreView,
    elapsed: f64,
    peak_throttle: f64,
    peak_pending: usize,
) -> LevelResult {
    let counters = &view.counters;
    LevelResult {
        level,
        target_eps,
        received_per_sec: (counters.received as f64 / elapsed) as u64,
        rendered_per_sec: (counters.rendered_total as f64 / elapsed) as u64,
        coalesce_pct: view.stats.coalesce_rate_pct,
        peak_throttle,
        peak_pending,
        skipped_flushes: counters.skipped_flushes,
        flushes: counters.flushes,
        flush_p99: view.flush_latency.p99,
        age_p99: view.age_latency.p99,
        duration_secs: elapsed,
    }
}

fn format_latency(us: u64) -> String {
    if us >= 1_000_000 {
        format!("{:.1}s", us as f64 / 1_000_000.0)
    } else if us >= 1_000 {
        format!("{:.1}ms", us as f64 / 1_000.0)
    } else {
        format!("{}us", us)
    }
}

fn print_results_table(results: &[LevelResult]) {
    println!("{}", "=".repeat(110));
    println!("{:^110}", "STRESS TEST RESULTS");
    println!("{}", "=".repeat(110));
    println!(
        " {:<5} {:>10} {:>11} {:>11} {:>10} {:>9} {:>9} {:>8} {:>8} {:>10} {:>8}",
        "Level", "Target/s", "Received/s", "Rendered/s", "Coalesce", "Throttle", "Pending", "Flushes", "Skipped", "Flush p99", "Age p99"
    );
    println!("{}", "-".repeat(110));

    for r in results {
        println!(
            " {:<5} {:>10} {:>11} {:>11} {:>9.1}% {:>8.0}% {:>9} {:>8} {:>8} {:>10} {:>6}ms",
            r.level,
            r.target_eps,
            r.received_per_sec,
            r.rendered_per_sec,
            r.coalesce_pct,
            r.peak_throttle * 100.0,
            r.peak_pending,
            r.flushes,
            r.skipped_flushes,
            format_latency(r.flush_p99),
            r.age_p99,
        );
    }

    println!("{}", "=".repeat(110));

    let total_time: f64 = results.iter().map(|r| r.duration_secs).sum();
    let total_skipped: u64 = results.iter().map(|r| r.skipped_flushes).sum();
    println!("Totals: {} levels, {} skipped flushes in {:.1}s", results.len(), total_skipped, total_time);
}

fn print_saturation_analysis(results: &[LevelResult]) {
    println!();

    // Rendering saturates once coalescing absorbs more than half the input.
    let saturation = results
        .iter()
        .find(|r| r.received_per_sec > 0 && r.rendered_per_sec * 2 < r.received_per_sec);

    if let Some(sat) = saturation {
        println!("Render saturation: Level {} (~{} events/sec target)", sat.level, sat.target_eps);
        println!(
            "  {} received/s collapsed to {} rendered/s ({:.0}% coalesced)",
            sat.received_per_sec, sat.rendered_per_sec, sat.coalesce_pct
        );
    } else {
        println!("No render saturation detected - every level was mostly applied 1:1.");
    }

    let throttled = results.iter().find(|r| r.peak_throttle > 0.0);
    match throttled {
        Some(r) => println!("Backpressure engaged from Level {} (peak throttle {:.0}%)", r.level, r.peak_throttle * 100.0),
        None => println!("Backpressure never engaged."),
    }

    let peak = results.iter().max_by_key(|r| r.received_per_sec);
    if let Some(p) = peak {
        println!("Peak ingest: ~{} events/sec (Level {})", p.received_per_sec, p.level);
    }
}
