//! Intel GPU exporter
//!
//! Configuration, metric exposition and the admin HTTP server around the
//! telemetry gatherer.

pub mod config;
pub mod metrics;
pub mod server;
