//! Shared types and utilities for the Intel GPU exporter
//!
//! This crate contains the telemetry reading data model, the gauge identity
//! model and small helpers used by the gatherer and the exporter binary.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{metric::*, reading::*};
