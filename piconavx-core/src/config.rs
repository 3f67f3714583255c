//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::NavxError;

/// TCP port boards connect to by default.
pub const DEFAULT_PORT: u16 = 65432;

/// Configuration for [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_addr: SocketAddr,
    /// Read deadline while the board streams line telemetry.
    pub normal_timeout: Duration,
    /// Read deadline after `SETDATA:FEED` was sent; one read may have to
    /// absorb a whole binary batch.
    pub high_bandwidth_timeout: Duration,
    /// How long a freshly accepted socket gets to answer with `ID:`.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            normal_timeout: Duration::from_secs(5),
            high_bandwidth_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Check the invariants the session loops rely on.
    pub fn validate(&self) -> Result<(), NavxError> {
        if self.normal_timeout.is_zero() || self.handshake_timeout.is_zero() {
            return Err(NavxError::InvalidConfig("timeouts must be non-zero".into()));
        }
        if self.high_bandwidth_timeout <= self.normal_timeout {
            return Err(NavxError::InvalidConfig(format!(
                "high-bandwidth timeout ({:?}) must exceed the normal timeout ({:?})",
                self.high_bandwidth_timeout, self.normal_timeout
            )));
        }
        Ok(())
    }
}
