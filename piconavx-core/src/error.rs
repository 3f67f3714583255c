//! Domain-specific error types for the picoNavX protocol.
//!
//! All fallible operations return `Result<T, NavxError>`.
//! Nothing panics on malformed input from a board; every failure is typed
//! so a disconnect event can say *why* a session ended.

use std::time::Duration;
use thiserror::Error;

use crate::protocol::TelemetryKind;

/// The canonical error type for the picoNavX protocol.
#[derive(Debug, Error)]
pub enum NavxError {
    // ── Decode Errors ────────────────────────────────────────────
    /// A field was present but did not parse as its declared type.
    #[error("cannot decode {kind} field `{field}` from {value:?}")]
    Decode {
        kind: TelemetryKind,
        field: &'static str,
        value: String,
    },

    /// A line ended before all of its declared fields were read.
    #[error("{kind} line is missing field `{field}`")]
    MissingField {
        kind: TelemetryKind,
        field: &'static str,
    },

    /// A line grew past the codec limit without a terminator.
    #[error("line too long: {size} bytes (max {max})")]
    LineTooLong { size: usize, max: usize },

    /// A Feed header announced more records than the codec accepts.
    #[error("feed frame too large: {chunks} records (max {max})")]
    FeedTooLarge { chunks: usize, max: usize },

    /// A line was not valid UTF-8.
    #[error("invalid utf-8 on the wire")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A token did not map to any known enum variant.
    #[error("unknown {type_name} token: {value:?}")]
    UnknownVariant {
        type_name: &'static str,
        value: String,
    },

    /// The peer violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Session Errors ───────────────────────────────────────────
    /// The peer answered the introduction with something other than `ID:`.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// No data arrived within the active read deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The session ended before the operation could complete.
    #[error("connection closed")]
    ConnectionClosed,

    // ── Configuration Errors ─────────────────────────────────────
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Task Errors ──────────────────────────────────────────────
    /// A supervised session task failed outside its own error path.
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl NavxError {
    /// `true` for failures caused by bytes the board sent, as opposed to
    /// the transport going away or going quiet.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. }
                | Self::MissingField { .. }
                | Self::LineTooLong { .. }
                | Self::FeedTooLarge { .. }
                | Self::InvalidUtf8(_)
                | Self::UnknownVariant { .. }
                | Self::ProtocolViolation(_)
        )
    }

    /// `true` when the read deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

// ── TaskError ─────────────────────────────────────────────────────

/// Typed error for a session task that did not return on its own.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task panicked; the payload message is kept when it is a string.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was aborted before it could finish.
    #[error("task was aborted")]
    Aborted,
}

impl From<tokio::task::JoinError> for TaskError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            return TaskError::Aborted;
        }
        let payload = e.into_panic();
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        TaskError::Panicked(msg)
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for NavxError {
    fn from(s: String) -> Self {
        NavxError::Other(s)
    }
}

impl From<&str> for NavxError {
    fn from(s: &str) -> Self {
        NavxError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for NavxError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        NavxError::ConnectionClosed
    }
}
