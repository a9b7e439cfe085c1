//! Telemetry reading and metric identity types

pub mod metric;
pub mod reading;
