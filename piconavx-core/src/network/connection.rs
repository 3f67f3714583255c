use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::NavxError;
use crate::protocol::{
    BoardIdentity, BoardState, Command, DataKind, FeedOverflowPolicy, HealthReport, Inbound,
    Report, ReportKind, Update,
};
use crate::state::{ConnectionPhase, KindCorrelator, ReportCorrelator};

/// Receiving half of a connection's command queue, owned by its write task.
pub type Outbox = mpsc::UnboundedReceiver<Command>;

/// Event raised by a connection's read task.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Telemetry the board pushed on its own.
    Update(Update),
    /// A report answering an earlier request arrived; its snapshot is updated.
    RequestCompleted(ReportKind),
}

/// Last received report of each request/response kind.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Snapshots {
    pub health: Option<HealthReport>,
    pub board_state: Option<BoardState>,
    pub board_identity: Option<BoardIdentity>,
}

/// Identity of one board session.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    session_id: u64,
    id: String,
    peer_addr: Option<SocketAddr>,
}

impl ConnectionInfo {
    /// A session on an accepted TCP socket.
    pub fn new(session_id: u64, id: impl Into<String>, peer_addr: SocketAddr) -> Self {
        Self {
            session_id,
            id: id.into(),
            peer_addr: Some(peer_addr),
        }
    }

    /// A session that never went through the TCP handshake.
    pub fn virtual_board(session_id: u64, id: impl Into<String>) -> Self {
        Self {
            session_id,
            id: id.into(),
            peer_addr: None,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer_addr {
            Some(addr) => write!(f, "{}@{}", self.id, addr),
            None => write!(f, "{} (virtual)", self.id),
        }
    }
}

/// A live session with one board.
///
/// Shared between the session's read and write tasks and any number of
/// consumers. Consumers queue commands with [`enqueue`](Self::enqueue) and
/// observe the board through [`subscribe`](Self::subscribe).
pub struct Connection {
    info: ConnectionInfo,
    phase: Mutex<ConnectionPhase>,
    transport_connected: AtomicBool,
    high_bandwidth: AtomicBool,
    snapshots: Mutex<Snapshots>,
    outbox: mpsc::UnboundedSender<Command>,
    observers: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,
    correlator: Arc<dyn ReportCorrelator>,
    cancel: CancellationToken,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    /// Create an `Active` connection and the outbox its write task drains.
    pub fn new(info: ConnectionInfo, cancel: CancellationToken) -> (Arc<Self>, Outbox) {
        Self::with_correlator(info, cancel, Arc::new(KindCorrelator::new()))
    }

    pub fn with_correlator(
        info: ConnectionInfo,
        cancel: CancellationToken,
        correlator: Arc<dyn ReportCorrelator>,
    ) -> (Arc<Self>, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            info,
            phase: Mutex::new(ConnectionPhase::active()),
            transport_connected: AtomicBool::new(true),
            high_bandwidth: AtomicBool::new(false),
            snapshots: Mutex::new(Snapshots::default()),
            outbox: tx,
            observers: Mutex::new(Vec::new()),
            correlator,
            cancel,
        };
        (Arc::new(conn), rx)
    }

    // ── Identity & state ─────────────────────────────────────────

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Board id announced in the handshake.
    pub fn id(&self) -> &str {
        self.info.id()
    }

    pub fn session_id(&self) -> u64 {
        self.info.session_id()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.info.peer_addr()
    }

    pub fn is_virtual(&self) -> bool {
        self.info.peer_addr().is_none()
    }

    pub fn phase(&self) -> ConnectionPhase {
        lock(&self.phase).clone()
    }

    pub fn is_transport_connected(&self) -> bool {
        self.transport_connected.load(Ordering::Acquire)
    }

    /// Whether the last `SETDATA` actually written selected Feed mode.
    pub fn is_high_bandwidth(&self) -> bool {
        self.high_bandwidth.load(Ordering::Acquire)
    }

    pub(crate) fn set_high_bandwidth(&self, on: bool) {
        self.high_bandwidth.store(on, Ordering::Release);
    }

    pub fn snapshots(&self) -> Snapshots {
        *lock(&self.snapshots)
    }

    pub fn last_health(&self) -> Option<HealthReport> {
        lock(&self.snapshots).health
    }

    pub fn last_board_state(&self) -> Option<BoardState> {
        lock(&self.snapshots).board_state
    }

    pub fn last_board_identity(&self) -> Option<BoardIdentity> {
        lock(&self.snapshots).board_identity
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Queue a command for the write task. Never blocks.
    pub fn enqueue(&self, command: Command) -> Result<(), NavxError> {
        trace!(conn = %self.info, %command, "enqueue");
        self.outbox.send(command)?;
        Ok(())
    }

    pub fn set_data_kind(&self, kind: DataKind) -> Result<(), NavxError> {
        self.enqueue(Command::SetDataKind(kind))
    }

    pub fn set_feed_overflow(&self, policy: FeedOverflowPolicy) -> Result<(), NavxError> {
        self.enqueue(Command::SetFeedOverflow(policy))
    }

    pub fn zero_yaw(&self) -> Result<(), NavxError> {
        self.enqueue(Command::ZeroYaw)
    }

    pub fn zero_displacement(&self) -> Result<(), NavxError> {
        self.enqueue(Command::ZeroDisplacement)
    }

    /// Ask the board for a report and wait for the next one of that kind.
    ///
    /// Matching is by kind only: concurrent callers asking for the same kind
    /// all resolve on the first report that arrives. Fails with
    /// [`NavxError::ConnectionClosed`] if the session ends first; drop the
    /// future to give up earlier.
    pub async fn request_report(&self, kind: ReportKind) -> Result<Report, NavxError> {
        let rx = self.correlator.register(kind);
        if let Err(e) = self.enqueue(kind.request()) {
            drop(rx);
            self.correlator.prune(kind);
            return Err(e);
        }
        tokio::select! {
            report = rx => report.map_err(|_| NavxError::ConnectionClosed),
            _ = self.cancel.cancelled() => Err(NavxError::ConnectionClosed),
        }
    }

    pub async fn request_health(&self) -> Result<HealthReport, NavxError> {
        match self.request_report(ReportKind::Health).await? {
            Report::Health(h) => Ok(h),
            _ => Err(NavxError::ProtocolViolation("correlator returned wrong report kind")),
        }
    }

    pub async fn request_board_state(&self) -> Result<BoardState, NavxError> {
        match self.request_report(ReportKind::BoardState).await? {
            Report::BoardState(s) => Ok(s),
            _ => Err(NavxError::ProtocolViolation("correlator returned wrong report kind")),
        }
    }

    pub async fn request_board_identity(&self) -> Result<BoardIdentity, NavxError> {
        match self.request_report(ReportKind::BoardIdentity).await? {
            Report::BoardIdentity(b) => Ok(b),
            _ => Err(NavxError::ProtocolViolation("correlator returned wrong report kind")),
        }
    }

    // ── Events ───────────────────────────────────────────────────

    /// Receive every event raised from now on, in arrival order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.observers).push(tx);
        rx
    }

    fn emit(&self, event: ConnectionEvent) {
        // Observers whose receiver was dropped are unsubscribed here.
        lock(&self.observers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Apply one decoded frame. Only the read task calls this.
    pub(crate) fn dispatch(&self, inbound: Inbound) {
        match inbound {
            Inbound::Update(update) => self.emit(ConnectionEvent::Update(update)),
            Inbound::Report(report) => {
                {
                    let mut snapshots = lock(&self.snapshots);
                    match report {
                        Report::Health(h) => snapshots.health = Some(h),
                        Report::BoardState(s) => snapshots.board_state = Some(s),
                        Report::BoardIdentity(b) => snapshots.board_identity = Some(b),
                    }
                }
                let resolved = self.correlator.complete(&report);
                trace!(conn = %self.info, kind = ?report.kind(), resolved, "report");
                self.emit(ConnectionEvent::RequestCompleted(report.kind()));
            }
            Inbound::Identity(id) => {
                debug!(conn = %self.info, %id, "ignoring repeated identity");
            }
            Inbound::Unknown(line) => {
                debug!(conn = %self.info, %line, "ignoring unknown line");
            }
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Ask the session to end. The server raises the disconnect event once
    /// both tasks have stopped.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the session is closing or closed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Final bookkeeping after both tasks stopped.
    pub(crate) fn mark_closed(&self) {
        lock(&self.phase).close();
        self.transport_connected.store(false, Ordering::Release);
        self.cancel.cancel();
        let abandoned = self.correlator.abandon_all();
        if abandoned > 0 {
            debug!(conn = %self.info, abandoned, "dropped pending report requests");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.info)
            .field("phase", &self.phase())
            .field("high_bandwidth", &self.is_high_bandwidth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::YprUpdate;

    fn test_connection() -> (Arc<Connection>, Outbox) {
        Connection::new(
            ConnectionInfo::virtual_board(1, "Test"),
            CancellationToken::new(),
        )
    }

    #[test]
    fn starts_active() {
        let (conn, _outbox) = test_connection();
        assert!(conn.phase().is_active());
        assert!(conn.is_transport_connected());
        assert!(!conn.is_high_bandwidth());
        assert!(conn.is_virtual());
        assert_eq!(conn.id(), "Test");
    }

    #[test]
    fn enqueue_is_fifo() {
        let (conn, mut outbox) = test_connection();
        conn.zero_yaw().unwrap();
        conn.set_data_kind(DataKind::Feed).unwrap();
        conn.enqueue(Command::RequestHealth).unwrap();

        assert_eq!(outbox.try_recv().unwrap(), Command::ZeroYaw);
        assert_eq!(
            outbox.try_recv().unwrap(),
            Command::SetDataKind(DataKind::Feed)
        );
        assert_eq!(outbox.try_recv().unwrap(), Command::RequestHealth);
        // Queuing alone never flips the mode.
        assert!(!conn.is_high_bandwidth());
    }

    #[test]
    fn enqueue_after_writer_gone_fails() {
        let (conn, outbox) = test_connection();
        drop(outbox);
        assert!(matches!(
            conn.enqueue(Command::ZeroYaw),
            Err(NavxError::ConnectionClosed)
        ));
    }

    #[test]
    fn report_overwrites_snapshot_and_notifies() {
        let (conn, _outbox) = test_connection();
        let mut events = conn.subscribe();

        for mem_used in [10, 20] {
            conn.dispatch(Inbound::Report(Report::Health(HealthReport {
                mem_used,
                mem_total: 100,
                core_temp_c: 40.0,
            })));
        }
        assert_eq!(conn.last_health().unwrap().mem_used, 20);
        assert!(conn.last_board_state().is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectionEvent::RequestCompleted(ReportKind::Health)
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectionEvent::RequestCompleted(ReportKind::Health)
        );
    }

    #[test]
    fn updates_reach_every_subscriber_in_order() {
        let (conn, _outbox) = test_connection();
        let mut a = conn.subscribe();
        let mut b = conn.subscribe();

        for yaw in [1.0, 2.0, 3.0] {
            conn.dispatch(Inbound::Update(Update::Ypr(YprUpdate {
                yaw,
                ..Default::default()
            })));
        }
        for rx in [&mut a, &mut b] {
            for yaw in [1.0, 2.0, 3.0] {
                match rx.try_recv().unwrap() {
                    ConnectionEvent::Update(Update::Ypr(y)) => assert_eq!(y.yaw, yaw),
                    other => panic!("unexpected {other:?}"),
                }
            }
        }
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let (conn, _outbox) = test_connection();
        drop(conn.subscribe());
        conn.dispatch(Inbound::Update(Update::Ypr(YprUpdate::default())));
        assert!(lock(&conn.observers).is_empty());
    }

    #[tokio::test]
    async fn request_report_resolves_from_read_path() {
        let (conn, mut outbox) = test_connection();
        let waiter = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request_board_identity().await }
        });

        assert_eq!(outbox.recv().await.unwrap(), Command::RequestBoardIdentity);
        let bid = BoardIdentity {
            board_type: 3,
            hw_rev: 1,
            fw_ver_major: 3,
            fw_ver_minor: 1,
            fw_revision: 0,
        };
        conn.dispatch(Inbound::Report(Report::BoardIdentity(bid)));

        assert_eq!(waiter.await.unwrap().unwrap(), bid);
        assert_eq!(conn.last_board_identity(), Some(bid));
    }

    #[tokio::test]
    async fn failed_request_leaves_no_waiter_behind() {
        let correlator = Arc::new(KindCorrelator::new());
        let (conn, outbox) = Connection::with_correlator(
            ConnectionInfo::virtual_board(1, "Test"),
            CancellationToken::new(),
            correlator.clone(),
        );
        drop(outbox);

        assert!(matches!(
            conn.request_health().await,
            Err(NavxError::ConnectionClosed)
        ));
        assert_eq!(correlator.registered(ReportKind::Health), 0);
    }

    #[tokio::test]
    async fn request_report_fails_when_closed() {
        let (conn, _outbox) = test_connection();
        let waiter = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request_health().await }
        });
        tokio::task::yield_now().await;
        conn.mark_closed();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(NavxError::ConnectionClosed)
        ));
        assert!(conn.phase().is_closed());
        assert!(!conn.is_transport_connected());
    }
}
