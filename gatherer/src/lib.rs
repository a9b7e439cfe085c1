//! GPU telemetry gatherer
//!
//! Runs the platform telemetry command (`intel_gpu_top` on Linux, a
//! PowerShell sampler on Windows), frames its streaming JSON output into
//! objects, decodes them into readings and keeps a set of Prometheus gauges
//! up to date with the latest values.

pub mod config;
pub mod decoder;
pub mod error;
pub mod framer;
pub mod gatherer;
pub mod launcher;
pub mod metrics;
pub mod router;

pub use config::GathererConfig;
pub use error::GathererError;
pub use gatherer::{Gatherer, GathererState, RunningGatherer};
pub use router::{MetricRouter, RouteSummary};
