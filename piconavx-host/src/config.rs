//! Configuration for the host service.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use piconavx_core::{DEFAULT_PORT, DataKind, FeedOverflowPolicy, NavxError, ServerConfig, SimConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Listener settings.
    pub network: NetworkConfig,
    /// Read and handshake deadlines.
    pub timeouts: TimeoutConfig,
    /// What the host asks of every board that connects.
    pub session: SessionConfig,
    /// In-process simulated boards.
    pub simulation: SimulationConfig,
    /// Logging and output settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind, e.g. "0.0.0.0" or "127.0.0.1".
    pub bind_address: String,
    /// TCP port boards connect to.
    pub port: u16,
}

/// Timeouts, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Read deadline for line telemetry.
    pub normal_ms: u64,
    /// Read deadline while the board streams Feed batches.
    pub high_bandwidth_ms: u64,
    /// Time a new socket gets to identify itself.
    pub handshake_ms: u64,
}

/// Per-board session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Stream selected right after a board connects: "raw", "ahrs",
    /// "ahrspos", "ypr" or "feed".
    pub data_kind: DataKind,
    /// Feed overflow policy to send on connect: "delete-oldest",
    /// "reduce-oldest-frequency" or "skip". Omitted = leave board default.
    pub feed_overflow: Option<FeedOverflowPolicy>,
    /// Ask for board identity and state on connect.
    pub query_on_connect: bool,
    /// How long to wait for an on-connect report.
    pub report_timeout_ms: u64,
    /// Health polling period. 0 disables polling.
    pub health_interval_ms: u64,
}

/// Simulated boards attached as virtual connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of boards to simulate (0 = none).
    pub boards: u32,
    /// Ids are `<id_prefix>-<n>`.
    pub id_prefix: String,
    /// Sample period of each simulated board.
    pub update_interval_ms: u64,
    /// Samples per Feed frame.
    pub feed_batch: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Print every update and report to stdout as a JSON line.
    pub json: bool,
    /// Period of the per-board update summary in log mode.
    pub summary_interval_ms: u64,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            normal_ms: 5_000,
            high_bandwidth_ms: 30_000,
            handshake_ms: 5_000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_kind: DataKind::Ypr,
            feed_overflow: None,
            query_on_connect: true,
            report_timeout_ms: 2_000,
            health_interval_ms: 10_000,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            boards: 0,
            id_prefix: "SimBoard".into(),
            update_interval_ms: 20,
            feed_batch: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            summary_interval_ms: 1_000,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Convert listener and timeout settings into a validated `ServerConfig`.
    pub fn to_server_config(&self) -> Result<ServerConfig, NavxError> {
        let ip: IpAddr = self.network.bind_address.parse().map_err(|_| {
            NavxError::InvalidConfig(format!(
                "bind_address {:?} is not an IP address",
                self.network.bind_address
            ))
        })?;
        let config = ServerConfig {
            bind_addr: SocketAddr::new(ip, self.network.port),
            normal_timeout: Duration::from_millis(self.timeouts.normal_ms),
            high_bandwidth_timeout: Duration::from_millis(self.timeouts.high_bandwidth_ms),
            handshake_timeout: Duration::from_millis(self.timeouts.handshake_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// Settings for the `index`-th simulated board.
    pub fn to_sim_config(&self, index: u32) -> SimConfig {
        SimConfig {
            id: format!("{}-{}", self.simulation.id_prefix, index + 1),
            update_interval: Duration::from_millis(self.simulation.update_interval_ms.max(1)),
            feed_batch: self.simulation.feed_batch.max(1),
            ..SimConfig::default()
        }
    }

    pub fn health_interval(&self) -> Option<Duration> {
        (self.session.health_interval_ms > 0)
            .then(|| Duration::from_millis(self.session.health_interval_ms))
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.session.report_timeout_ms.max(1))
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_millis(self.logging.summary_interval_ms.max(100))
    }
}

// ── Tests ────────────────────────────────────────────────────────
