//! Configuration types for the gatherer

use crate::framer::DEFAULT_MAX_OBJECT_BYTES;
use igpu_shared::{is_valid_metric_name, Platform};
use std::time::Duration;

/// Default metric name prefix
pub const DEFAULT_PREFIX: &str = "igpu";

/// Default sampling and processing period
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(5);

/// Longest accepted refresh period
pub const MAX_REFRESH: Duration = Duration::from_secs(24 * 60 * 60);

/// Gatherer configuration
#[derive(Debug, Clone)]
pub struct GathererConfig {
    /// Which telemetry command to run and how to read its output
    pub platform: Platform,

    /// Device selector passed to the telemetry command (None = default GPU)
    pub device: Option<String>,

    /// Sampling period of the command and processing period of the gatherer
    pub refresh: Duration,

    /// Extra arguments for `intel_gpu_top`, split on whitespace
    pub additional_args: String,

    /// Prefix of every exported metric name
    pub prefix: String,

    /// Largest JSON object accepted from the command
    pub max_object_bytes: usize,
}

impl Default for GathererConfig {
    fn default() -> Self {
        Self {
            platform: Platform::detect(),
            device: None,
            refresh: DEFAULT_REFRESH,
            additional_args: String::new(),
            prefix: DEFAULT_PREFIX.to_string(),
            max_object_bytes: DEFAULT_MAX_OBJECT_BYTES,
        }
    }
}

impl GathererConfig {
    /// Device selector, ignoring empty strings
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref().filter(|d| !d.trim().is_empty())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.refresh.is_zero() {
            anyhow::bail!("Refresh period must be greater than 0");
        }

        if self.refresh > MAX_REFRESH {
            anyhow::bail!(
                "Refresh period {:?} exceeds the maximum of {:?}",
                self.refresh,
                MAX_REFRESH
            );
        }

        if !is_valid_metric_name(&self.prefix) {
            anyhow::bail!("Invalid metric prefix: '{}'", self.prefix);
        }

        if self.max_object_bytes == 0 {
            anyhow::bail!("Max object size must be greater than 0");
        }

        Ok(())
    }
}
