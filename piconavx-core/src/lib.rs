//! # piconavx-core
//!
//! Host-side protocol library for picoNavX IMU boards.
//!
//! This crate contains:
//! - **Protocol types**: telemetry records, `Telemetry`, `Update`, `Report`, `Command`
//! - **Status flags**: `OpStatus` and the `bitflags` views over the raw status bytes
//! - **Codec**: `NavxCodec`, line framing plus binary Feed frames via `tokio_util`
//! - **Network**: `Server` (listener, handshake, registry) and `Connection` (per-board handle)
//! - **State**: connection lifecycle and request/response correlation
//! - **Task**: `SessionTasks`, supervision of each session's read and write halves
//! - **Sim**: `SimulatedBoard`, the device side of the protocol for virtual connections
//! - **Error**: `NavxError`, typed, `thiserror`-based error hierarchy

pub mod codec;
pub mod config;
pub mod error;
pub mod flags;
pub mod network;
pub mod protocol;
pub mod sim;
pub mod state;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{MAX_LINE_LENGTH, NavxCodec};
pub use config::{DEFAULT_PORT, ServerConfig};
pub use error::{NavxError, TaskError};
pub use flags::{
    CalibrationStatus, CapabilityFlags, ImuCalState, OpStatus, SelfTestStatus, SensorStatus,
};
pub use network::{
    Connection, ConnectionEvent, ConnectionInfo, ReadTimeouts, Server, ServerEvent, Snapshots,
};
pub use protocol::{
    Command, DataKind, FeedOverflowPolicy, FeedSample, Inbound, Report, ReportKind, Telemetry,
    TelemetryKind, Update,
};
pub use sim::{SimConfig, SimulatedBoard};
pub use state::{ConnectionPhase, KindCorrelator, ReportCorrelator};
pub use task::{SessionOutcome, SessionTasks};
