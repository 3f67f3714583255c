//! Connection lifecycle state machine.
//!
//! Transitions are validated and return `Result` instead of panicking.

use std::time::Instant;

use crate::error::NavxError;

// ── ConnectionPhase ──────────────────────────────────────────────

/// The current phase of a board session.
///
/// ```text
///  Handshaking ──► Active ──► Closed
///       │                       ▲
///       └───────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// Socket accepted; introduction sent, waiting for `ID:`.
    #[default]
    Handshaking,

    /// Identified; read and write tasks are running.
    Active {
        /// When the session entered the `Active` state.
        since: Instant,
    },

    /// Tasks finished and the session was deregistered. Terminal.
    Closed,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Active { .. } => write!(f, "Active"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl ConnectionPhase {
    /// A phase that skipped the handshake, for virtual connections.
    pub fn active() -> Self {
        Self::Active {
            since: Instant::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// How long the session has been `Active`.
    ///
    /// Returns `None` for any other phase.
    pub fn active_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Active { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Active`.
    ///
    /// Valid from: `Handshaking`.
    pub fn complete_handshake(&mut self) -> Result<(), NavxError> {
        match self {
            Self::Handshaking => {
                *self = Self::active();
                Ok(())
            }
            _ => Err(NavxError::ProtocolViolation(
                "cannot complete handshake: not in Handshaking state",
            )),
        }
    }

    /// Transition to `Closed` from any state. Returns `false` if the phase
    /// was already closed.
    pub fn close(&mut self) -> bool {
        let was_open = !self.is_closed();
        *self = Self::Closed;
        was_open
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = ConnectionPhase::default();
        assert_eq!(phase, ConnectionPhase::Handshaking);

        phase.complete_handshake().unwrap();
        assert!(phase.is_active());
        assert!(phase.active_duration().is_some());

        assert!(phase.close());
        assert!(phase.is_closed());
        assert!(phase.active_duration().is_none());
    }

    #[test]
    fn handshake_cannot_complete_twice() {
        let mut phase = ConnectionPhase::active();
        assert!(phase.complete_handshake().is_err());
    }

    #[test]
    fn closed_is_terminal() {
        let mut phase = ConnectionPhase::Closed;
        assert!(phase.complete_handshake().is_err());
        assert!(!phase.close());
    }

    #[test]
    fn failed_handshake_closes() {
        let mut phase = ConnectionPhase::Handshaking;
        assert!(phase.close());
        assert!(phase.is_closed());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionPhase::Handshaking.to_string(), "Handshaking");
        assert_eq!(ConnectionPhase::active().to_string(), "Active");
        assert_eq!(ConnectionPhase::Closed.to_string(), "Closed");
    }
}
