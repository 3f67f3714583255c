//! Board listener.
//!
//! `Server` accepts any number of boards, runs the handshake on each socket,
//! and supervises one read and one write task per session. Lifecycle changes
//! are reported through an `mpsc::UnboundedSender<ServerEvent>`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::codec::NavxCodec;
use crate::config::ServerConfig;
use crate::error::{NavxError, TaskError};
use crate::network::connection::{Connection, ConnectionInfo, Outbox};
use crate::network::session::{self, ReadTimeouts};
use crate::state::ConnectionPhase;
use crate::task::SessionTasks;

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion)
/// does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle notification from a [`Server`].
#[derive(Debug)]
pub enum ServerEvent {
    /// A board completed the handshake (or a virtual board was attached).
    Connected(Arc<Connection>),
    /// A session ended and was removed from the registry.
    Disconnected {
        connection: Arc<Connection>,
        read_error: Option<NavxError>,
        write_error: Option<NavxError>,
    },
}

/// State shared by the accept loop and every session.
struct Shared {
    config: ServerConfig,
    registry: RwLock<HashMap<u64, Arc<Connection>>>,
    next_session_id: AtomicU64,
    events: mpsc::UnboundedSender<ServerEvent>,
    sessions: TaskTracker,
    cancel: CancellationToken,
}

impl Shared {
    /// Create, register and announce a connection.
    fn open(&self, info: ConnectionInfo) -> (Arc<Connection>, Outbox) {
        let (conn, outbox) = Connection::new(info, self.cancel.child_token());
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn.session_id(), conn.clone());
        info!(conn = %conn.info(), "board connected");
        let _ = self.events.send(ServerEvent::Connected(conn.clone()));
        (conn, outbox)
    }

    fn deregister(&self, session_id: u64) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id);
    }

    fn allocate_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// A listening picoNavX host.
pub struct Server {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

impl Server {
    /// Validate `config`, bind the listener and start accepting boards.
    pub async fn listen(
        config: ServerConfig,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<Self, NavxError> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening for boards");

        let shared = Arc::new(Shared {
            config,
            registry: RwLock::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
            events,
            sessions: TaskTracker::new(),
            cancel: CancellationToken::new(),
        });
        let accept = tokio::spawn(accept_loop(listener, shared.clone()));

        Ok(Self {
            local_addr,
            shared,
            accept,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    // ── Registry ─────────────────────────────────────────────────

    /// Snapshot of every live connection.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.shared
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Look up a live connection by the id its board announced.
    pub fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.shared
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|c| c.id() == id)
            .cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.shared
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run a session over an arbitrary stream, skipping the handshake.
    pub fn attach_virtual<S>(&self, id: impl Into<String>, stream: S) -> Arc<Connection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let info = ConnectionInfo::virtual_board(self.shared.allocate_session_id(), id);
        let (conn, outbox) = self.shared.open(info);
        self.shared.sessions.spawn(run_session(
            self.shared.clone(),
            conn.clone(),
            outbox,
            Framed::new(stream, NavxCodec::new()),
        ));
        conn
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Token cancelled when the server stops. Every session token is a child.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Stop accepting, end every session and wait for all of them to emit
    /// their disconnect event. The listener is released last.
    pub async fn stop(mut self) -> Result<(), NavxError> {
        info!(local_addr = %self.local_addr, "stopping server");
        self.shared.cancel.cancel();
        (&mut self.accept).await.map_err(TaskError::from)?;
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

// ── Tasks ────────────────────────────────────────────────────────

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        let accepted = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((socket, peer)) => {
                debug!(%peer, "socket accepted");
                shared.sessions.spawn(serve_socket(socket, peer, shared.clone()));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    shared.sessions.close();
    shared.sessions.wait().await;
    drop(listener);
    info!("listener closed");
}

/// Handshake one accepted socket, then run its session.
async fn serve_socket(socket: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    if let Err(e) = socket.set_nodelay(true) {
        debug!(%peer, error = %e, "could not set TCP_NODELAY");
    }
    let mut phase = ConnectionPhase::Handshaking;
    let mut framed = Framed::new(socket, NavxCodec::new());
    let limit = shared.config.handshake_timeout;

    let id = tokio::select! {
        _ = shared.cancel.cancelled() => return,
        id = session::handshake(&mut framed, limit) => id,
    };

    match id.and_then(|id| phase.complete_handshake().map(|()| id)) {
        Ok(id) => {
            let info = ConnectionInfo::new(shared.allocate_session_id(), id, peer);
            let (conn, outbox) = shared.open(info);
            run_session(shared, conn, outbox, framed).await;
        }
        Err(e) => {
            phase.close();
            warn!(%peer, %phase, error = %e, "handshake failed");
        }
    }
}

async fn run_session<S>(
    shared: Arc<Shared>,
    conn: Arc<Connection>,
    outbox: Outbox,
    framed: Framed<S, NavxCodec>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = framed.split();
    let timeouts = ReadTimeouts::from(&shared.config);

    let tasks = SessionTasks::spawn(
        {
            let conn = conn.clone();
            async move { session::read_loop(&conn, stream, timeouts).await }
        },
        {
            let conn = conn.clone();
            async move { session::write_loop(&conn, outbox, sink).await }
        },
    );
    let outcome = tasks.supervise(conn.cancel_token()).await;

    conn.mark_closed();
    shared.deregister(conn.session_id());

    if outcome.is_clean() {
        info!(conn = %conn.info(), "board disconnected");
    } else {
        warn!(
            conn = %conn.info(),
            read_error = ?outcome.read_error,
            write_error = ?outcome.write_error,
            "session ended with error"
        );
    }
    let _ = shared.events.send(ServerEvent::Disconnected {
        connection: conn,
        read_error: outcome.read_error,
        write_error: outcome.write_error,
    });
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::network::connection::ConnectionEvent;
    use crate::protocol::Update;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            handshake_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_bind() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cfg = ServerConfig {
            high_bandwidth_timeout: Duration::from_secs(1),
            ..local_config()
        };
        assert!(matches!(
            Server::listen(cfg, tx).await,
            Err(NavxError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn registry_tracks_sessions() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = Server::listen(local_config(), tx).await.unwrap();

        let socket = TcpStream::connect(server.local_addr()).await.unwrap();
        let (rd, mut wr) = socket.into_split();
        let mut lines = BufReader::new(rd).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "PICONAVX-HOST");
        wr.write_all(b"ID:Left\n").await.unwrap();

        let conn = match rx.recv().await.unwrap() {
            ServerEvent::Connected(c) => c,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(conn.id(), "Left");
        assert_eq!(server.connection_count(), 1);
        assert!(server.connection("Left").is_some());
        assert!(server.connection("Right").is_none());

        drop(wr);
        drop(lines);
        match rx.recv().await.unwrap() {
            ServerEvent::Disconnected { connection, read_error, .. } => {
                assert_eq!(connection.session_id(), conn.session_id());
                assert!(read_error.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(server.connection_count(), 0);
        assert!(conn.phase().is_closed());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn virtual_session_dispatches_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = Server::listen(local_config(), tx).await.unwrap();
        let (host_end, mut board_end) = tokio::io::duplex(1024);

        let conn = server.attach_virtual("Sim", host_end);
        assert!(conn.is_virtual());
        assert!(matches!(rx.recv().await, Some(ServerEvent::Connected(_))));

        let mut events = conn.subscribe();
        board_end.write_all(b"YPR:10|20|30\n").await.unwrap();
        match events.recv().await.unwrap() {
            ConnectionEvent::Update(Update::Ypr(y)) => assert_eq!(y.roll, 30.0),
            other => panic!("unexpected {other:?}"),
        }

        server.stop().await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::Disconnected { read_error: None, write_error: None, .. })
        ));
    }
}
