pub mod connection;
mod correlation;

pub use connection::ConnectionPhase;
pub use correlation::{KindCorrelator, ReportCorrelator};
