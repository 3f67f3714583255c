//! Per-connection I/O loops.
//!
//! The handshake runs once on the freshly accepted socket. After that the
//! framed stream is split: [`read_loop`] owns the inbound half and
//! [`write_loop`] owns the outbound half. Both stop on the connection's
//! cancellation token and report terminal failures through their `Result`.

use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::codec::NavxCodec;
use crate::config::ServerConfig;
use crate::error::NavxError;
use crate::network::connection::{Connection, Outbox};
use crate::protocol::{Command, HOST_INTRODUCTION, Telemetry};

/// Read deadlines for the two stream modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTimeouts {
    pub normal: Duration,
    pub high_bandwidth: Duration,
}

impl ReadTimeouts {
    pub fn for_mode(&self, high_bandwidth: bool) -> Duration {
        if high_bandwidth {
            self.high_bandwidth
        } else {
            self.normal
        }
    }
}

impl From<&ServerConfig> for ReadTimeouts {
    fn from(config: &ServerConfig) -> Self {
        Self {
            normal: config.normal_timeout,
            high_bandwidth: config.high_bandwidth_timeout,
        }
    }
}

/// Send the host introduction and wait for the board's `ID:` line.
///
/// Returns the announced board id. Bytes the board sends right after its id
/// stay buffered in `framed`.
pub async fn handshake<S>(
    framed: &mut Framed<S, NavxCodec>,
    limit: Duration,
) -> Result<String, NavxError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io = framed.get_mut();
    io.write_all(HOST_INTRODUCTION.as_bytes()).await?;
    io.write_all(b"\n").await?;
    io.flush().await?;

    let reply = tokio::time::timeout(limit, framed.next())
        .await
        .map_err(|_| NavxError::Timeout(limit))?;

    match reply {
        Some(Ok(Telemetry::Identity(id))) if !id.is_empty() => Ok(id),
        Some(Ok(Telemetry::Identity(_))) => {
            Err(NavxError::HandshakeRejected("empty board id".into()))
        }
        Some(Ok(other)) => Err(NavxError::HandshakeRejected(format!(
            "expected identity, got {}",
            other.kind()
        ))),
        Some(Err(e)) => Err(e),
        None => Err(NavxError::ConnectionClosed),
    }
}

/// Decode frames and dispatch them to `conn` until the stream ends.
///
/// Each frame, including a complete Feed batch, must arrive within the
/// deadline for the current mode.
pub async fn read_loop<R>(
    conn: &Connection,
    mut frames: R,
    timeouts: ReadTimeouts,
) -> Result<(), NavxError>
where
    R: Stream<Item = Result<Telemetry, NavxError>> + Unpin,
{
    loop {
        let limit = timeouts.for_mode(conn.is_high_bandwidth());
        let next = tokio::select! {
            biased;
            _ = conn.closed() => return Ok(()),
            next = tokio::time::timeout(limit, frames.next()) => next,
        };

        match next {
            Err(_) => return Err(NavxError::Timeout(limit)),
            Ok(None) => {
                debug!(conn = %conn.info(), "board closed the stream");
                return Ok(());
            }
            Ok(Some(Err(e))) => return Err(e),
            Ok(Some(Ok(telemetry))) => conn.dispatch(telemetry.into()),
        }
    }
}

/// Drain the outbox into `sink`, one flushed line per command.
pub async fn write_loop<W>(
    conn: &Connection,
    mut outbox: Outbox,
    mut sink: W,
) -> Result<(), NavxError>
where
    W: Sink<Command, Error = NavxError> + Unpin,
{
    loop {
        let command = tokio::select! {
            biased;
            _ = conn.closed() => return Ok(()),
            command = outbox.recv() => command,
        };
        let Some(command) = command else {
            return Ok(());
        };

        tokio::select! {
            biased;
            _ = conn.closed() => return Ok(()),
            sent = sink.send(command) => sent?,
        }
        trace!(conn = %conn.info(), %command, "command sent");

        if let Command::SetDataKind(kind) = command {
            conn.set_high_bandwidth(kind.is_high_bandwidth());
            debug!(
                conn = %conn.info(),
                ?kind,
                high_bandwidth = kind.is_high_bandwidth(),
                "data kind switched"
            );
        }
    }
}
