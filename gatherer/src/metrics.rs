//! Self-metrics of the gatherer pipeline

use prometheus::{IntCounter, Opts, Registry};

/// Counters describing how the telemetry stream is being processed
#[derive(Clone)]
pub struct GathererMetrics {
    /// Readings decoded and routed
    pub readings: IntCounter,

    /// Candidates that failed to decode
    pub decode_errors: IntCounter,

    /// Individual fields skipped while routing
    pub skipped_fields: IntCounter,

    /// Partial objects discarded for exceeding the size limit
    pub frame_overflows: IntCounter,
}

fn counter(prefix: &str, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    IntCounter::with_opts(Opts::new(format!("{}_exporter_{}", prefix, name), help))
}

impl GathererMetrics {
    pub fn new(prefix: &str) -> prometheus::Result<Self> {
        Ok(Self {
            readings: counter(prefix, "readings_total", "Telemetry readings applied to gauges")?,
            decode_errors: counter(
                prefix,
                "decode_errors_total",
                "Telemetry objects that failed to decode",
            )?,
            skipped_fields: counter(
                prefix,
                "skipped_fields_total",
                "Telemetry fields skipped while updating gauges",
            )?,
            frame_overflows: counter(
                prefix,
                "frame_overflows_total",
                "Partial telemetry objects discarded for exceeding the size limit",
            )?,
        })
    }

    /// Register every counter with `registry`
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.readings.clone()))?;
        registry.register(Box::new(self.decode_errors.clone()))?;
        registry.register(Box::new(self.skipped_fields.clone()))?;
        registry.register(Box::new(self.frame_overflows.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_registered_under_prefix() {
        let registry = Registry::new();
        let metrics = GathererMetrics::new("igpu").unwrap();
        metrics.register(&registry).unwrap();
        metrics.readings.inc();

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"igpu_exporter_readings_total".to_string()));
        assert!(names.contains(&"igpu_exporter_frame_overflows_total".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let metrics = GathererMetrics::new("igpu").unwrap();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
