//! # piconavx-host
//!
//! Host service for picoNavX boards: listens for boards, selects their
//! telemetry stream, polls health and reports what they send either as
//! log summaries or as JSON lines on stdout.

pub mod config;
pub mod service;
