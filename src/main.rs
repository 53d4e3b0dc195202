use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ticker_flow::config::{ConfigPatch, StreamConfig};
use ticker_flow::generator::DEFAULT_TICKER_COUNT;
use ticker_flow::pipeline;
use ticker_flow::stress;
use ticker_flow::tui;
use ticker_flow::window::{self, DEFAULT_OVERSCAN};

#[derive(Parser)]
#[command(name = "ticker-flow", about = "Coalescing, backpressure and virtualized rendering of a ticker stream")]
struct Cli {
    /// Run mode: tui, headless, or stress
    #[arg(long, default_value = "tui")]
    mode: String,

    /// Source emission rate
    #[arg(long, default_value = "2000", allow_negative_numbers = true)]
    events_per_second: i64,

    /// Minimum time between flushes, ms
    #[arg(long, default_value = "100", allow_negative_numbers = true)]
    buffer_interval_ms: i64,

    /// Pending-buffer size at which throttling reaches 100%
    #[arg(long, default_value = "500", allow_negative_numbers = true)]
    throttle_threshold: i64,

    /// Viewport height in rows (headless/stress reporting)
    #[arg(long, default_value = "20", allow_negative_numbers = true)]
    window_size: i64,

    /// Row height in layout units
    #[arg(long, default_value = "1", allow_negative_numbers = true)]
    row_height: i64,

    /// Inject bursts concentrated on a few hot keys
    #[arg(long)]
    burst: bool,

    /// Number of distinct tickers the source walks
    #[arg(long, default_value_t = DEFAULT_TICKER_COUNT)]
    tickers: usize,

    /// Run duration in seconds (0 = infinite)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Seconds per stress level (stress mode only)
    #[arg(long, default_value = "5")]
    level_duration: u64,

    /// Headless: print per-second stats as JSON lines
    #[arg(long)]
    json: bool,

    /// Write logs to this file (the only log sink in tui mode)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn stream_config(&self) -> StreamConfig {
        StreamConfig::clamped(&ConfigPatch {
            events_per_second: Some(self.events_per_second),
            buffer_interval_ms: Some(self.buffer_interval_ms),
            throttle_threshold: Some(self.throttle_threshold),
            window_size: Some(self.window_size),
            row_height: Some(self.row_height),
            burst_enabled: Some(self.burst),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli)?;
    let config = cli.stream_config();

    match cli.mode.as_str() {
        "tui" => tui::run(config, cli.tickers, cli.duration).await?,
        "headless" => run_headless(config, cli.tickers, cli.duration, cli.json).await?,
        "stress" => stress::run(config, cli.tickers, cli.level_duration).await?,
        other => eprintln!("Unknown mode: {other}. Use --mode tui|headless|stress"),
    }

    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match (&cli.log_file, cli.mode.as_str()) {
        (Some(path), _) => {
            let file = std::fs::File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        // stderr would draw over the alternate screen
        (None, "tui") => {}
        (None, _) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

async fn run_headless(
    config: StreamConfig,
    tickers: usize,
    duration_secs: u64,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== ticker-flow (headless) ===");
    println!(
        "Rate: {} ev/s, Interval: {}ms, Threshold: {}, Burst: {}, Tickers: {}, Duration: {}",
        config.events_per_second,
        config.buffer_interval_ms,
        config.throttle_threshold,
        config.burst_enabled,
        tickers,
        if duration_secs == 0 { "infinite".to_string() } else { format!("{duration_secs}s") },
    );
    println!();

    let handle = pipeline::spawn(config, tickers);
    handle.request_snapshot().await?;
    handle.start().await?;

    let run_duration = if duration_secs == 0 { Duration::from_secs(3600) } else { Duration::from_secs(duration_secs) };
    let start = Instant::now();

    while start.elapsed() < run_duration {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let view = handle.view();
        if json {
            println!("{}", serde_json::to_string(&view.stats)?);
            continue;
        }
        println!(
            "  t={:>4}s | recv {:>9} ({:>8.0}/s) | rendered {:>8} ({:>6.0}/s) | pending {:>5} | throttle {:>3.0}%{}",
            start.elapsed().as_secs(),
            view.counters.received,
            view.stats.throughput,
            view.counters.rendered_total,
            view.stats.render_rate,
            view.pending,
            view.throttle.throttle_level * 100.0,
            if view.throttle.is_throttling { " THROTTLING" } else { "" },
        );
    }

    handle.stop().await?;
    let view = handle.view();
    handle.shutdown().await;

    // Summary
    let counters = &view.counters;
    let viewport = view.config.config.viewport_height();
    let range = window::visible_range(0, view.config.config.row_height, viewport, view.tickers.len(), DEFAULT_OVERSCAN);
    println!();
    println!("=== Results ===");
    println!("  Received:          {}", counters.received);
    println!("  Rendered:          {}", counters.rendered_total);
    println!("  Coalesced:         {}", counters.coalesced_total);
    println!("  Malformed:         {}", counters.malformed_total);
    println!("  Pending at stop:   {}", view.pending);
    println!("  Flushes:           {} ({} skipped)", counters.flushes, counters.skipped_flushes);
    println!("  Efficiency:        {:.1}%", view.stats.efficiency_pct);
    println!("  Coalesce rate:     {:.1}%", view.stats.coalesce_rate_pct);
    println!(
        "  Virtual window:    {} of {} rows materialized (extent {})",
        range.len(),
        view.tickers.len(),
        range.total_height
    );
    println!();
    let ingest = &view.ingest_latency;
    let flush = &view.flush_latency;
    let age = &view.age_latency;
    println!("  Latency:");
    println!("    Ingest (us): p50={} p95={} p99={} min={} max={}", ingest.p50, ingest.p95, ingest.p99, ingest.min, ingest.max);
    println!("    Flush (us):  p50={} p95={} p99={} min={} max={}", flush.p50, flush.p95, flush.p99, flush.min, flush.max);
    println!("    Age (ms):    p50={} p95={} p99={} min={} max={}", age.p50, age.p95, age.p99, age.min, age.max);

    Ok(())
}
