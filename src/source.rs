//! The event source: a random-walk generator on its own task, reachable only
//! through messages.
//!
//! Messages are serde-tagged so the same contract can be framed as JSON if
//! the source ever moves out of process.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::StreamConfig;
use crate::generator::TickerGenerator;
use crate::types::UpdateEvent;

/// Emission cadence. Each tick emits whatever the configured rate owes for
/// the time since the previous emission.
pub const EMIT_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSettings {
    pub events_per_second: u32,
    pub burst_enabled: bool,
}

impl From<&StreamConfig> for SourceSettings {
    fn from(config: &StreamConfig) -> Self {
        Self { events_per_second: config.events_per_second, burst_enabled: config.burst_enabled }
    }
}

/// Host → source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceCommand {
    /// Begin emitting; every batch is tagged with `session`.
    Start { session: u64 },
    Stop,
    Configure { settings: SourceSettings },
    RequestSnapshot,
}

/// Source → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceMessage {
    Ready,
    RunStateChanged { running: bool },
    UpdatesAvailable { session: u64, events: Vec<UpdateEvent> },
    Snapshot { events: Vec<UpdateEvent> },
}

pub struct SourceHandle {
    pub commands: mpsc::UnboundedSender<SourceCommand>,
    pub messages: mpsc::UnboundedReceiver<SourceMessage>,
    pub task: JoinHandle<()>,
}

/// Spawn a source over `ticker_count` random-walk tickers.
pub fn spawn(settings: SourceSettings, ticker_count: usize) -> SourceHandle {
    spawn_with(TickerGenerator::new(ticker_count), settings)
}

pub fn spawn_with(generator: TickerGenerator, settings: SourceSettings) -> SourceHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(generator, settings, cmd_rx, msg_tx));
    SourceHandle { commands: cmd_tx, messages: msg_rx, task }
}

struct Emitter {
    session: u64,
    last_emit: Instant,
    carry: f64,
}

async fn run(
    mut generator: TickerGenerator,
    mut settings: SourceSettings,
    mut commands: mpsc::UnboundedReceiver<SourceCommand>,
    messages: mpsc::UnboundedSender<SourceMessage>,
) {
    generator.burst_enabled = settings.burst_enabled;
    info!(tickers = generator.ticker_count(), "event source ready");
    if messages.send(SourceMessage::Ready).is_err() {
        return;
    }

    let mut ticker = tokio::time::interval(EMIT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut emitter: Option<Emitter> = None;

    loop {
        let outgoing = tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    SourceCommand::Start { session } => {
                        let was_running = emitter.is_some();
                        emitter = Some(Emitter { session, last_emit: Instant::now(), carry: 0.0 });
                        debug!(session, "source started");
                        (!was_running).then_some(SourceMessage::RunStateChanged { running: true })
                    }
                    SourceCommand::Stop => emitter
                        .take()
                        .map(|_| SourceMessage::RunStateChanged { running: false }),
                    SourceCommand::Configure { settings: next } => {
                        settings = next;
                        generator.burst_enabled = next.burst_enabled;
                        debug!(eps = next.events_per_second, burst = next.burst_enabled, "source reconfigured");
                        None
                    }
                    SourceCommand::RequestSnapshot => Some(SourceMessage::Snapshot {
                        events: generator.snapshot(TickerGenerator::now_ms()),
                    }),
                }
            }
            now = ticker.tick(), if emitter.is_some() => {
                emitter.as_mut().and_then(|emitter| {
                    let elapsed = now.saturating_duration_since(emitter.last_emit).as_secs_f64();
                    emitter.last_emit = now;
                    emitter.carry += settings.events_per_second as f64 * elapsed;
                    let count = emitter.carry.floor();
                    emitter.carry -= count;

                    let events = generator.generate_cycle(count as usize, TickerGenerator::now_ms());
                    (!events.is_empty()).then(|| SourceMessage::UpdatesAvailable {
                        session: emitter.session,
                        events,
                    })
                })
            }
        };

        if let Some(msg) = outgoing {
            if messages.send(msg).is_err() {
                break;
            }
        }
    }

    debug!("event source shut down");
}
