//! Host service core logic.
//!
//! Runs the board listener, attaches any simulated boards as virtual
//! connections, and gives every connected board a monitor task that
//! selects its stream, polls its health and reports what it sends.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use piconavx_core::{
    Command, Connection, ConnectionEvent, DataKind, FeedOverflowPolicy, NavxError, Report,
    ReportKind, Server, ServerEvent, SimulatedBoard, TelemetryKind, Update,
};

use crate::config::HostConfig;

/// Buffer size of the in-memory pipe behind each simulated board.
const SIM_PIPE_CAPACITY: usize = 64 * 1024;

// ── HostService ──────────────────────────────────────────────────

/// The top-level host service.
///
/// Owns the configuration and a cancellation token; [`run`](Self::run)
/// serves boards until the token fires.
pub struct HostService {
    config: HostConfig,
    cancel: CancellationToken,
}

impl HostService {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Handle that stops the service from another task (e.g. Ctrl-C).
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the service until stopped.
    ///
    /// 1. Binds the board listener.
    /// 2. Attaches the configured number of simulated boards.
    /// 3. Starts a monitor for every board that connects.
    /// 4. On stop, ends the simulators, then every session, then waits for
    ///    the monitors to drain.
    pub async fn run(&self) -> Result<(), NavxError> {
        let server_config = self.config.to_server_config()?;
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let server = Server::listen(server_config, events_tx).await?;

        let boards = TaskTracker::new();
        let boards_cancel = self.cancel.child_token();
        for index in 0..self.config.simulation.boards {
            let sim = self.config.to_sim_config(index);
            let (host_side, board_side) = tokio::io::duplex(SIM_PIPE_CAPACITY);
            server.attach_virtual(sim.id.clone(), host_side);

            let cancel = boards_cancel.clone();
            boards.spawn(async move {
                let id = sim.id.clone();
                if let Err(e) = SimulatedBoard::new(sim).run(board_side, cancel).await {
                    warn!(board = %id, "simulated board stopped: {e}");
                }
            });
        }
        boards.close();

        let monitors = TaskTracker::new();
        let settings = Arc::new(MonitorSettings::from(&self.config));
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            handle_server_event(event, &monitors, &settings);
        }

        info!("shutting down host service");
        boards_cancel.cancel();
        boards.wait().await;
        server.stop().await?;

        while let Ok(event) = events.try_recv() {
            handle_server_event(event, &monitors, &settings);
        }
        monitors.close();
        monitors.wait().await;

        info!("host service stopped");
        Ok(())
    }
}

fn handle_server_event(
    event: ServerEvent,
    monitors: &TaskTracker,
    settings: &Arc<MonitorSettings>,
) {
    match event {
        ServerEvent::Connected(conn) => {
            monitors.spawn(monitor_board(conn, settings.clone()));
        }
        ServerEvent::Disconnected {
            connection,
            read_error,
            write_error,
        } => match (read_error, write_error) {
            (None, None) => info!(conn = %connection.info(), "board disconnected"),
            (read, write) => warn!(
                conn = %connection.info(),
                read_error = ?read.map(|e| e.to_string()),
                write_error = ?write.map(|e| e.to_string()),
                "board dropped"
            ),
        },
    }
}

// ── Monitor ──────────────────────────────────────────────────────

/// What the monitor asks of each board.
#[derive(Debug, Clone)]
struct MonitorSettings {
    data_kind: DataKind,
    feed_overflow: Option<FeedOverflowPolicy>,
    query_on_connect: bool,
    report_timeout: Duration,
    health_interval: Option<Duration>,
    summary_interval: Duration,
    json: bool,
}

impl From<&HostConfig> for MonitorSettings {
    fn from(config: &HostConfig) -> Self {
        Self {
            data_kind: config.session.data_kind,
            feed_overflow: config.session.feed_overflow,
            query_on_connect: config.session.query_on_connect,
            report_timeout: config.report_timeout(),
            health_interval: config.health_interval(),
            summary_interval: config.summary_interval(),
            json: config.logging.json,
        }
    }
}

/// Configure one board and report its traffic until the session ends.
async fn monitor_board(conn: Arc<Connection>, settings: Arc<MonitorSettings>) {
    let mut events = conn.subscribe();

    if let Err(e) = configure(&conn, &settings) {
        debug!(conn = %conn.info(), "board closed before configuration: {e}");
        return;
    }

    let query = query_board(&conn, settings.report_timeout);
    tokio::pin!(query);
    let mut queried = !settings.query_on_connect;

    let mut health = settings.health_interval.map(delayed_interval);
    let mut summary_tick = delayed_interval(settings.summary_interval);
    let mut summary = Summary::default();

    loop {
        tokio::select! {
            biased;
            _ = conn.closed() => break,
            Some(event) = events.recv() => {
                if settings.json {
                    print_event(&conn, &event);
                } else {
                    log_event(&conn, &event, &mut summary);
                }
            }
            _ = &mut query, if !queried => queried = true,
            _ = next_tick(&mut health) => {
                if let Err(e) = conn.enqueue(Command::RequestHealth) {
                    debug!(conn = %conn.info(), "health poll skipped: {e}");
                }
            }
            _ = summary_tick.tick(), if !settings.json => {
                summary.log(&conn, settings.summary_interval);
            }
        }
    }
    debug!(conn = %conn.info(), "monitor finished");
}

fn configure(conn: &Connection, settings: &MonitorSettings) -> Result<(), NavxError> {
    if let Some(policy) = settings.feed_overflow {
        conn.set_feed_overflow(policy)?;
    }
    conn.set_data_kind(settings.data_kind)?;
    info!(conn = %conn.info(), data_kind = ?settings.data_kind, "board configured");
    Ok(())
}

/// Ask for identity and state, one at a time.
async fn query_board(conn: &Connection, limit: Duration) {
    match tokio::time::timeout(limit, conn.request_board_identity()).await {
        Ok(Ok(identity)) => info!(
            conn = %conn.info(),
            board_type = identity.board_type,
            hw_rev = identity.hw_rev,
            firmware = %identity.firmware_version(),
            "board identity"
        ),
        Ok(Err(e)) => warn!(conn = %conn.info(), "identity request failed: {e}"),
        Err(_) => warn!(conn = %conn.info(), "identity request timed out after {limit:?}"),
    }

    match tokio::time::timeout(limit, conn.request_board_state()).await {
        Ok(Ok(state)) => {
            let status = state
                .op_status()
                .map(|s| s.to_string())
                .unwrap_or_else(|e| e.to_string());
            info!(
                conn = %conn.info(),
                op_status = %status,
                update_rate_hz = state.update_rate_hz,
                accel_fsr_g = state.accel_fsr_g,
                gyro_fsr_dps = state.gyro_fsr_dps,
                capabilities = ?state.capabilities(),
                "board state"
            );
        }
        Ok(Err(e)) => warn!(conn = %conn.info(), "board state request failed: {e}"),
        Err(_) => warn!(conn = %conn.info(), "board state request timed out after {limit:?}"),
    }
}

fn delayed_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ── Output ───────────────────────────────────────────────────────

/// One JSON line on stdout.
#[derive(Debug, Serialize)]
struct Record<'a> {
    board: &'a str,
    session: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    update: Option<&'a Update>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<Report>,
}

impl<'a> Record<'a> {
    fn new(conn: &'a Connection, event: &'a ConnectionEvent) -> Option<Self> {
        let (update, report) = match event {
            ConnectionEvent::Update(update) => (Some(update), None),
            ConnectionEvent::RequestCompleted(kind) => (None, Some(latest_report(conn, *kind)?)),
        };
        Some(Self {
            board: conn.id(),
            session: conn.session_id(),
            update,
            report,
        })
    }
}

fn latest_report(conn: &Connection, kind: ReportKind) -> Option<Report> {
    match kind {
        ReportKind::Health => conn.last_health().map(Report::Health),
        ReportKind::BoardState => conn.last_board_state().map(Report::BoardState),
        ReportKind::BoardIdentity => conn.last_board_identity().map(Report::BoardIdentity),
    }
}

fn print_event(conn: &Connection, event: &ConnectionEvent) {
    let Some(record) = Record::new(conn, event) else {
        return;
    };
    match serde_json::to_string(&record) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{line}") {
                error!("stdout write failed: {e}");
            }
        }
        Err(e) => error!(conn = %conn.info(), "record serialization failed: {e}"),
    }
}

fn log_event(conn: &Connection, event: &ConnectionEvent, summary: &mut Summary) {
    match event {
        ConnectionEvent::Update(update) => summary.record(update),
        ConnectionEvent::RequestCompleted(ReportKind::Health) => {
            if let Some(health) = conn.last_health() {
                info!(
                    conn = %conn.info(),
                    mem_used = health.mem_used,
                    mem_total = health.mem_total,
                    mem_usage = ?health.mem_usage(),
                    core_temp_c = health.core_temp_c,
                    "board health"
                );
            }
        }
        ConnectionEvent::RequestCompleted(kind) => {
            debug!(conn = %conn.info(), ?kind, "report received");
        }
    }
}

/// Update counts between two summary ticks.
#[derive(Debug, Default, Clone, PartialEq)]
struct Summary {
    updates: u64,
    samples: u64,
    last_kind: Option<TelemetryKind>,
    last_batch: u64,
}

impl Summary {
    fn record(&mut self, update: &Update) {
        self.updates += 1;
        let batch = match update {
            Update::Feed(samples) => samples.len() as u64,
            _ => 1,
        };
        self.samples += batch;
        self.last_kind = Some(update.kind());
        self.last_batch = batch;
    }

    fn sample_rate(&self, period: Duration) -> f64 {
        self.samples as f64 / period.as_secs_f64()
    }

    fn log(&mut self, conn: &Connection, period: Duration) {
        let summary = std::mem::take(self);
        let Some(kind) = summary.last_kind else {
            return;
        };
        info!(
            conn = %conn.info(),
            %kind,
            updates = summary.updates,
            samples = summary.samples,
            rate_hz = %format!("{:.1}", summary.sample_rate(period)),
            high_bandwidth = conn.is_high_bandwidth(),
            "telemetry"
        );
        debug!(conn = %conn.info(), samples = summary.last_batch, "latest update");
    }
}

// ── Tests ────────────────────────────────────────────────────────
