use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction as LayoutDirection, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table};
use ratatui::Terminal;

use crate::config::{ConfigPatch, StreamConfig};
use crate::pipeline::{self, CoreHandle, CoreView};
use crate::types::Direction;
use crate::window::{self, DEFAULT_OVERSCAN};

const FRAME: Duration = Duration::from_millis(33);
const INTERVAL_STEP_MS: i64 = 50;

struct App {
    scroll_offset: u64,
    /// Table body height from the last draw, in rows.
    viewport_rows: u16,
    should_quit: bool,
    uptime: Instant,
}

impl App {
    fn new() -> Self {
        Self { scroll_offset: 0, viewport_rows: 1, should_quit: false, uptime: Instant::now() }
    }

    fn scroll_by(&mut self, rows: i64, view: &CoreView) {
        let row_height = view.config.config.row_height as u64;
        let max = window::max_scroll_offset(
            view.config.config.row_height,
            self.viewport_rows as u64 * row_height,
            view.tickers.len(),
        );
        let delta = rows.unsigned_abs().saturating_mul(row_height);
        self.scroll_offset = if rows < 0 {
            self.scroll_offset.saturating_sub(delta)
        } else {
            self.scroll_offset.saturating_add(delta).min(max)
        };
    }
}

pub async fn run(config: StreamConfig, ticker_count: usize, duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, config, ticker_count, duration).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    config: StreamConfig,
    ticker_count: usize,
    duration: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let handle = pipeline::spawn(config, ticker_count);
    handle.request_snapshot().await?;
    handle.start().await?;
    let mut app = App::new();

    let run_duration = if duration == 0 {
        Duration::from_secs(3600)
    } else {
        Duration::from_secs(duration)
    };

    while !app.should_quit && app.uptime.elapsed() < run_duration {
        let view = handle.view();
        terminal.draw(|f| draw(f, &mut app, &view))?;

        // Handle input
        if event::poll(FRAME)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key(key.code, &mut app, &handle, &view).await?;
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn handle_key(
    code: KeyCode,
    app: &mut App,
    handle: &CoreHandle,
    view: &CoreView,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = view.config.config;
    match code {
        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
        KeyCode::Char('s') => {
            if view.running {
                handle.stop().await?;
            } else {
                handle.start().await?;
            }
        }
        KeyCode::Char('+') | KeyCode::Char('=') => {
            let eps = config.events_per_second as i64 * 2;
            handle.configure(ConfigPatch { events_per_second: Some(eps), ..Default::default() }).await?;
        }
        KeyCode::Char('-') => {
            let eps = config.events_per_second as i64 / 2;
            handle.configure(ConfigPatch { events_per_second: Some(eps), ..Default::default() }).await?;
        }
        KeyCode::Char(']') => {
            let ms = config.buffer_interval_ms as i64 + INTERVAL_STEP_MS;
            handle.configure(ConfigPatch { buffer_interval_ms: Some(ms), ..Default::default() }).await?;
        }
        KeyCode::Char('[') => {
            let ms = config.buffer_interval_ms as i64 - INTERVAL_STEP_MS;
            handle.configure(ConfigPatch { buffer_interval_ms: Some(ms), ..Default::default() }).await?;
        }
        KeyCode::Char('b') => {
            let burst = !config.burst_enabled;
            handle.configure(ConfigPatch { burst_enabled: Some(burst), ..Default::default() }).await?;
        }
        KeyCode::Char('r') => {
            handle.reset_stats().await?;
        }
        KeyCode::Up => app.scroll_by(-1, view),
        KeyCode::Down => app.scroll_by(1, view),
        KeyCode::PageUp => app.scroll_by(-(app.viewport_rows as i64), view),
        KeyCode::PageDown => app.scroll_by(app.viewport_rows as i64, view),
        KeyCode::Home => app.scroll_offset = 0,
        KeyCode::End => app.scroll_by(i64::MAX / 2, view),
        _ => {}
    }
    Ok(())
}

fn draw(f: &mut ratatui::Frame, app: &mut App, view: &CoreView) {
    let size = f.area();

    let chunks = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Length(7), // stats + throttle + latency
            Constraint::Min(5),    // ticker window
        ])
        .split(size);

    draw_header(f, app, view, chunks[0]);
    draw_panels(f, view, chunks[1]);
    draw_tickers(f, app, view, chunks[2]);
}

fn draw_header(f: &mut ratatui::Frame, app: &App, view: &CoreView, area: Rect) {
    let config = &view.config.config;
    let (status, status_color) = match (view.ready, view.running) {
        (false, _) => ("NOT READY", Color::Red),
        (true, true) => ("RUNNING", Color::Green),
        (true, false) => ("STOPPED", Color::Yellow),
    };
    let header = vec![
        Span::styled(" ticker-flow ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::styled(status, Style::default().fg(status_color).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::raw(format!("{} ev/s", config.events_per_second)),
        Span::raw(" | "),
        Span::raw(format!("flush {}ms", config.buffer_interval_ms)),
        Span::raw(" | "),
        Span::styled(
            if config.burst_enabled { "burst ON" } else { "burst off" },
            Style::default().fg(if config.burst_enabled { Color::Magenta } else { Color::DarkGray }),
        ),
        Span::raw(" | "),
        Span::raw(format!("Uptime: {}s", app.uptime.elapsed().as_secs())),
        Span::raw(" | "),
        Span::styled(
            "q=quit s=start/stop +/-=rate [/]=interval b=burst r=reset",
            Style::default().fg(Color::DarkGray),
        ),
    ];
    let p = Paragraph::new(Line::from(header))
        .block(Block::default().borders(Borders::ALL).title(format!(" config v{} ", view.config.version)));
    f.render_widget(p, area);
}

fn draw_panels(f: &mut ratatui::Frame, view: &CoreView, area: Rect) {
    let chunks = Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(25), Constraint::Percentage(35)])
        .split(area);

    // Counters
    let stats = &view.stats;
    let counters = &view.counters;
    let stats_text = vec![
        Line::from(vec![
            Span::styled("  Received:  ", Style::default().fg(Color::Green)),
            Span::raw(format!("{:<10} {:>9.0}/s", counters.received, stats.throughput)),
        ]),
        Line::from(vec![
            Span::styled("  Rendered:  ", Style::default().fg(Color::Cyan)),
            Span::raw(format!("{:<10} {:>9.0}/s", counters.rendered_total, stats.render_rate)),
        ]),
        Line::from(vec![
            Span::styled("  Coalesced: ", Style::default().fg(Color::Yellow)),
            Span::raw(format!("{:<10} {:>8.1}%", counters.coalesced_total, stats.coalesce_rate_pct)),
        ]),
        Line::from(vec![
            Span::styled("  Efficiency:", Style::default().fg(Color::White)),
            Span::raw(format!(" {:.1}%   malformed {}", stats.efficiency_pct, counters.malformed_total)),
        ]),
    ];
    let stats_widget = Paragraph::new(stats_text)
        .block(Block::default().borders(Borders::ALL).title(" Counters "));
    f.render_widget(stats_widget, chunks[0]);

    // Throttle
    let throttle = &view.throttle;
    let gauge_color = if throttle.throttle_level > 0.5 {
        Color::Red
    } else if throttle.is_throttling {
        Color::Yellow
    } else {
        Color::Green
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Throttle {}/{} {} ",
            view.pending,
            view.config.config.throttle_threshold,
            if throttle.is_throttling { "THROTTLING" } else { "" },
        )))
        .gauge_style(Style::default().fg(gauge_color))
        .ratio(throttle.throttle_level.clamp(0.0, 1.0))
        .label(format!("{:.0}%  skipped {}", throttle.throttle_level * 100.0, counters.skipped_flushes));
    f.render_widget(gauge, chunks[1]);

    // Latency
    let flush = &view.flush_latency;
    let age = &view.age_latency;
    let ingest = &view.ingest_latency;
    let latency_text = vec![
        Line::from(vec![
            Span::styled("  Ingest: ", Style::default().fg(Color::Green)),
            Span::raw(format!("p50={:<5} p99={:<6} us", ingest.p50, ingest.p99)),
        ]),
        Line::from(vec![
            Span::styled("  Flush:  ", Style::default().fg(Color::Cyan)),
            Span::raw(format!("p50={:<5} p99={:<6} us", flush.p50, flush.p99)),
        ]),
        Line::from(vec![
            Span::styled("  Age:    ", Style::default().fg(Color::Yellow)),
            Span::raw(format!("p50={:<5} p99={:<6} ms", age.p50, age.p99)),
        ]),
        Line::from(vec![
            Span::styled("  Flushes: ", Style::default().fg(Color::DarkGray)),
            Span::raw(format!("{}", counters.flushes)),
        ]),
    ];
    let latency_widget = Paragraph::new(latency_text)
        .block(Block::default().borders(Borders::ALL).title(" Latency "));
    f.render_widget(latency_widget, chunks[2]);
}

fn draw_tickers(f: &mut ratatui::Frame, app: &mut App, view: &CoreView, area: Rect) {
    // Borders and the header row are not part of the scrollable body.
    app.viewport_rows = area.height.saturating_sub(3).max(1);
    let row_height = view.config.config.row_height;
    let viewport_height = app.viewport_rows as u64 * row_height as u64;
    let total = view.tickers.len();

    app.scroll_offset = app.scroll_offset.min(window::max_scroll_offset(row_height, viewport_height, total));
    let range = window::visible_range(app.scroll_offset, row_height, viewport_height, total, DEFAULT_OVERSCAN);
    let skip = range.rows_above(app.scroll_offset, row_height);

    let rows: Vec<Row> = view.tickers[range.start_index..range.end_index]
        .iter()
        .skip(skip)
        .take(app.viewport_rows as usize)
        .map(|t| {
            let color = match t.direction {
                Direction::Up => Color::Green,
                Direction::Down => Color::Red,
                Direction::None => Color::White,
            };
            let change_color = if t.change_pct >= 0.0 { Color::Green } else { Color::Red };
            Row::new(vec![
                Cell::from(Span::styled(format!("{:<6}", t.key), Style::default().add_modifier(Modifier::BOLD))),
                Cell::from(Span::styled(format!("{:>10.2}", t.value), Style::default().fg(color))),
                Cell::from(Span::styled(t.direction.label(), Style::default().fg(color))),
                Cell::from(format!("{:>10.2}", t.previous_value)),
                Cell::from(Span::styled(format!("{:>+7.2}%", t.change_pct), Style::default().fg(change_color))),
                Cell::from(format!("{:>7}", t.volume)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(7),
            Constraint::Length(11),
            Constraint::Length(2),
            Constraint::Length(11),
            Constraint::Length(9),
            Constraint::Min(8),
        ],
    )
    .header(
        Row::new(vec!["KEY", "VALUE", "", "PREV", "CHG", "VOLUME"])
            .style(Style::default().add_modifier(Modifier::BOLD).fg(Color::White)),
    )
    .block(Block::default().borders(Borders::ALL).title(format!(
        " Tickers {}  rows {}..{} materialized {} (offset {}, extent {}) ",
        total,
        range.start_index,
        range.end_index,
        range.len(),
        range.top_offset,
        range.total_height,
    )));

    f.render_widget(table, area);
}
