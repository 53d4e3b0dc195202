//! The stream core.
//!
//! [`StreamCore`] holds every piece of consumer state: the coalescing buffer,
//! the ticker store, the flush scheduler, counters and config. It is driven
//! from a single task ([`spawn`]) that multiplexes host commands, source
//! messages, scheduler wakes, flag decay and stats sampling. Only one handler
//! runs at a time, so ingest and flush never overlap and no locks are needed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::backpressure::BackpressureController;
use crate::buffer::{CoalescingBuffer, IngestReport};
use crate::config::{ConfigPatch, StreamConfig, VersionedConfig};
use crate::error::FlowError;
use crate::generator::TickerGenerator;
use crate::latency::{LatencyStats, LatencyTracker};
use crate::scheduler::{FlushScheduler, FlushTargets, TickOutcome};
use crate::source::{self, SourceCommand, SourceHandle, SourceMessage, SourceSettings};
use crate::stats::{StatsAggregator, StatsSnapshot, STATS_WINDOW};
use crate::store::{TickerStore, FLAG_DISPLAY_MS};
use crate::types::{Counters, ThrottleState, TickerState};

/// How often direction flags are checked for expiry.
pub const DECAY_INTERVAL: Duration = Duration::from_millis(200);
/// Commands held while the source has not reported ready.
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoreCommand {
    Start,
    Stop,
    Configure(ConfigPatch),
    RequestSnapshot,
    ResetStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAck {
    Applied,
    /// Already in the requested state, or the patch changed nothing.
    Unchanged,
    /// Held until the source reports ready.
    Queued,
}

/// Read-only snapshot published to consumers after every core step.
#[derive(Debug, Clone)]
pub struct CoreView {
    pub ready: bool,
    pub running: bool,
    pub session: u64,
    pub config: VersionedConfig,
    pub throttle: ThrottleState,
    pub counters: Counters,
    pub stats: StatsSnapshot,
    pub pending: usize,
    pub ingest_latency: LatencyStats,
    pub flush_latency: LatencyStats,
    pub age_latency: LatencyStats,
    /// Ordered by key.
    pub tickers: Arc<Vec<TickerState>>,
}

pub struct StreamCore {
    config: VersionedConfig,
    ready: bool,
    running: bool,
    session: u64,
    queued: VecDeque<CoreCommand>,
    buffer: CoalescingBuffer,
    store: TickerStore,
    scheduler: FlushScheduler,
    counters: Counters,
    stats: StatsAggregator,
    latency: LatencyTracker,
    outbox: Vec<SourceCommand>,
    tickers: Arc<Vec<TickerState>>,
    tickers_revision: Option<u64>,
}

impl StreamCore {
    /// Out-of-range fields in `config` are clamped, as for any patch.
    pub fn new(config: StreamConfig, controller: BackpressureController, now: Instant) -> Self {
        let config = config.clamp();
        Self {
            config: VersionedConfig::new(config),
            ready: false,
            running: false,
            session: 0,
            queued: VecDeque::new(),
            buffer: CoalescingBuffer::new(),
            store: TickerStore::new(),
            scheduler: FlushScheduler::new(controller),
            counters: Counters::default(),
            stats: StatsAggregator::new(now),
            latency: LatencyTracker::new(),
            outbox: Vec::new(),
            tickers: Arc::new(Vec::new()),
            tickers_revision: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn config(&self) -> &VersionedConfig {
        &self.config
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn store(&self) -> &TickerStore {
        &self.store
    }

    pub fn scheduler(&self) -> &FlushScheduler {
        &self.scheduler
    }

    pub fn queued_commands(&self) -> usize {
        self.queued.len()
    }

    pub fn next_wake(&self) -> Option<Instant> {
        self.scheduler.next_wake()
    }

    /// Commands for the source produced since the last call.
    pub fn take_outbox(&mut self) -> Vec<SourceCommand> {
        std::mem::take(&mut self.outbox)
    }

    pub fn handle_command(&mut self, command: CoreCommand, now: Instant) -> Result<CommandAck, FlowError> {
        if !self.ready && command != CoreCommand::ResetStats {
            if self.queued.len() >= COMMAND_QUEUE_CAPACITY {
                return Err(FlowError::CommandQueueFull { capacity: COMMAND_QUEUE_CAPACITY });
            }
            debug!(?command, "source not ready, queueing command");
            self.queued.push_back(command);
            return Ok(CommandAck::Queued);
        }

        let ack = match command {
            CoreCommand::Start => self.start(now),
            CoreCommand::Stop => self.stop(),
            CoreCommand::Configure(patch) => self.configure(&patch),
            CoreCommand::RequestSnapshot => {
                self.outbox.push(SourceCommand::RequestSnapshot);
                CommandAck::Applied
            }
            CoreCommand::ResetStats => self.reset_stats(now),
        };
        Ok(ack)
    }

    fn start(&mut self, now: Instant) -> CommandAck {
        if self.running {
            return CommandAck::Unchanged;
        }
        self.session += 1;
        self.running = true;
        self.scheduler.start(now);
        self.outbox.push(SourceCommand::Start { session: self.session });
        info!(session = self.session, "stream started");
        CommandAck::Applied
    }

    fn stop(&mut self) -> CommandAck {
        // The scheduler is stopped regardless so a stop is always a hard
        // boundary for mutation.
        self.scheduler.stop();
        if !self.running {
            return CommandAck::Unchanged;
        }
        self.running = false;
        self.outbox.push(SourceCommand::Stop);
        info!(session = self.session, pending = self.buffer.len(), "stream stopped");
        CommandAck::Applied
    }

    fn configure(&mut self, patch: &ConfigPatch) -> CommandAck {
        if !self.config.apply(patch) {
            return CommandAck::Unchanged;
        }
        if patch.touches_source() {
            self.outbox.push(SourceCommand::Configure { settings: SourceSettings::from(&self.config.config) });
        }
        info!(version = self.config.version, config = ?self.config.config, "reconfigured");
        CommandAck::Applied
    }

    /// Zero cumulative counters. Events still pending are carried into
    /// `received` so the accounting identity holds across the reset.
    fn reset_stats(&mut self, now: Instant) -> CommandAck {
        self.counters = Counters { received: self.buffer.len() as u64, ..Counters::default() };
        self.stats = StatsAggregator::new(now);
        self.latency.reset();
        info!("stats reset");
        CommandAck::Applied
    }

    pub fn handle_message(&mut self, message: SourceMessage, now: Instant, now_ms: i64) -> Option<IngestReport> {
        match message {
            SourceMessage::Ready => {
                self.on_ready(now);
                None
            }
            SourceMessage::RunStateChanged { running } => {
                debug!(running, "source run state changed");
                None
            }
            SourceMessage::UpdatesAvailable { session, events } => {
                if !self.running || session != self.session {
                    trace!(session, current = self.session, count = events.len(), "discarding stale batch");
                    return None;
                }
                let started = Instant::now();
                let report = self.buffer.ingest(events, &mut self.counters);
                self.latency.record_ingest(started);
                Some(report)
            }
            SourceMessage::Snapshot { events } => {
                let seeded = self.store.seed(events, now_ms);
                info!(seeded, "initial snapshot applied");
                None
            }
        }
    }

    fn on_ready(&mut self, now: Instant) {
        if self.ready {
            return;
        }
        self.ready = true;
        info!(queued = self.queued.len(), "event source ready");
        while let Some(command) = self.queued.pop_front() {
            if let Err(err) = self.handle_command(command, now) {
                warn!(%err, ?command, "queued command failed");
            }
        }
    }

    /// The source went away. Commands queue again until a new `Ready`.
    pub fn source_lost(&mut self) {
        if self.ready {
            warn!("event source lost, core not ready");
        }
        self.ready = false;
        self.running = false;
        self.scheduler.stop();
    }

    pub fn on_wake(&mut self, now: Instant, now_ms: i64) -> TickOutcome {
        let config = self.config.config;
        self.scheduler.tick(
            now,
            now_ms,
            &config,
            FlushTargets {
                buffer: &mut self.buffer,
                store: &mut self.store,
                counters: &mut self.counters,
                latency: &mut self.latency,
            },
        )
    }

    /// Expire direction flags. A stopped core is frozen, so flags stay as
    /// they were at the stop.
    pub fn decay(&mut self, now_ms: i64) -> usize {
        if !self.running {
            return 0;
        }
        self.store.decay_flags(now_ms, FLAG_DISPLAY_MS)
    }

    pub fn sample_stats(&mut self, now: Instant) -> StatsSnapshot {
        self.stats.sample(now, &self.counters)
    }

    pub fn view(&mut self) -> CoreView {
        if self.tickers_revision != Some(self.store.revision()) {
            self.tickers = Arc::new(self.store.ordered());
            self.tickers_revision = Some(self.store.revision());
        }
        CoreView {
            ready: self.ready,
            running: self.running,
            session: self.session,
            config: self.config,
            throttle: self.scheduler.throttle(),
            counters: self.counters,
            stats: self.stats.latest(),
            pending: self.buffer.len(),
            ingest_latency: self.latency.ingest_stats(),
            flush_latency: self.latency.flush_stats(),
            age_latency: self.latency.age_stats(),
            tickers: Arc::clone(&self.tickers),
        }
    }
}

// ── Task + Handle ──

struct Request {
    command: CoreCommand,
    reply: oneshot::Sender<Result<CommandAck, FlowError>>,
}

/// Host side of a running core. Commands resolve once the core has applied
/// them, so after `stop().await` returns no further flush will happen.
pub struct CoreHandle {
    requests: mpsc::UnboundedSender<Request>,
    view: watch::Receiver<CoreView>,
    task: JoinHandle<()>,
}

impl CoreHandle {
    pub async fn start(&self) -> Result<CommandAck, FlowError> {
        self.send(CoreCommand::Start).await
    }

    pub async fn stop(&self) -> Result<CommandAck, FlowError> {
        self.send(CoreCommand::Stop).await
    }

    pub async fn configure(&self, patch: ConfigPatch) -> Result<CommandAck, FlowError> {
        self.send(CoreCommand::Configure(patch)).await
    }

    pub async fn request_snapshot(&self) -> Result<CommandAck, FlowError> {
        self.send(CoreCommand::RequestSnapshot).await
    }

    pub async fn reset_stats(&self) -> Result<CommandAck, FlowError> {
        self.send(CoreCommand::ResetStats).await
    }

    pub async fn send(&self, command: CoreCommand) -> Result<CommandAck, FlowError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request { command, reply })
            .map_err(|_| FlowError::CoreClosed)?;
        rx.await.map_err(|_| FlowError::CoreClosed)?
    }

    /// Latest published view.
    pub fn view(&self) -> CoreView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoreView> {
        self.view.clone()
    }

    /// Wait until the published view satisfies `pred`.
    pub async fn wait_for<F>(&self, pred: F) -> Result<CoreView, FlowError>
    where
        F: FnMut(&CoreView) -> bool,
    {
        let mut rx = self.view.clone();
        let view = rx.wait_for(pred).await.map_err(|_| FlowError::CoreClosed)?;
        Ok(view.clone())
    }

    /// Stop the core task and the source behind it.
    pub async fn shutdown(self) {
        drop(self.requests);
        if let Err(err) = self.task.await {
            warn!(%err, "core task ended abnormally");
        }
    }
}

/// Spawn a source over `ticker_count` tickers and a core consuming it.
pub fn spawn(config: StreamConfig, ticker_count: usize) -> CoreHandle {
    let config = config.clamp();
    let source = source::spawn(SourceSettings::from(&config), ticker_count);
    spawn_with(config, BackpressureController::new(), source)
}

/// Like [`spawn`] with a seeded generator and controller.
pub fn spawn_seeded(config: StreamConfig, ticker_count: usize, seed: u64) -> CoreHandle {
    let config = config.clamp();
    let source = source::spawn_with(TickerGenerator::with_seed(ticker_count, seed), SourceSettings::from(&config));
    spawn_with(config, BackpressureController::with_seed(seed), source)
}

pub fn spawn_with(config: StreamConfig, controller: BackpressureController, source: SourceHandle) -> CoreHandle {
    let mut core = StreamCore::new(config, controller, Instant::now());
    let (view_tx, view_rx) = watch::channel(core.view());
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(core, req_rx, source, view_tx));
    CoreHandle { requests: req_tx, view: view_rx, task }
}

async fn run(
    mut core: StreamCore,
    mut requests: mpsc::UnboundedReceiver<Request>,
    source: SourceHandle,
    view: watch::Sender<CoreView>,
) {
    let SourceHandle { commands: source_tx, messages: mut source_rx, task: source_task } = source;
    let mut source_open = true;

    let mut decay = tokio::time::interval(DECAY_INTERVAL);
    decay.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stats = tokio::time::interval(STATS_WINDOW);
    stats.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let wake = core.next_wake();
        let mut reply = None;
        tokio::select! {
            // Commands first so a stop takes effect before any further
            // ingest; wakes ahead of messages so a flood cannot starve flushes.
            biased;

            req = requests.recv() => {
                let Some(Request { command, reply: tx }) = req else { break };
                reply = Some((tx, core.handle_command(command, Instant::now())));
            }
            _ = sleep_until(wake) => {
                core.on_wake(Instant::now(), TickerGenerator::now_ms());
            }
            _ = decay.tick() => {
                core.decay(TickerGenerator::now_ms());
            }
            _ = stats.tick() => {
                core.sample_stats(Instant::now());
            }
            msg = source_rx.recv(), if source_open => match msg {
                Some(msg) => {
                    core.handle_message(msg, Instant::now(), TickerGenerator::now_ms());
                }
                None => {
                    source_open = false;
                    core.source_lost();
                }
            }
        }

        // Both commands and a replayed queue after `Ready` produce source
        // commands; a reply is only sent once they are forwarded and the view
        // reflects the command.
        if source_open {
            if let Err(err) = forward(&mut core, &source_tx) {
                warn!(%err, "dropping source commands");
                source_open = false;
            }
        }
        view.send_replace(core.view());
        if let Some((tx, ack)) = reply {
            let _ = tx.send(ack);
        }
    }

    drop(source_tx);
    if let Err(err) = source_task.await {
        warn!(%err, "event source task ended abnormally");
    }
    info!(counters = ?core.counters(), "stream core shut down");
}

/// Forward queued source commands.
fn forward(core: &mut StreamCore, source_tx: &mpsc::UnboundedSender<SourceCommand>) -> Result<(), FlowError> {
    for cmd in core.take_outbox() {
        if source_tx.send(cmd).is_err() {
            core.source_lost();
            return Err(FlowError::SourceClosed);
        }
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
