//! Metric router
//!
//! Applies readings to gauges. Static families are registered when the
//! router is built; per-engine gauges are created and registered the first
//! time their name shows up and reused afterwards. Gauges never decay: a
//! gauge absent from a reading keeps its last value.

use igpu_shared::{
    exposition_name, MetricId, Platform, Reading, Sample, ENGINE_METRIC_HELP,
};
use prometheus::core::Collector;
use prometheus::{Gauge, GaugeVec, Opts, Registry};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("failed to register gauge '{name}': {source}")]
    Register {
        name: String,
        #[source]
        source: prometheus::Error,
    },

    #[error("gauge '{0}' was rejected earlier")]
    Rejected(String),

    #[error("no gauge family '{0}' is registered for this platform")]
    UnknownFamily(String),

    #[error("bad label for '{name}': {source}")]
    Label {
        name: String,
        #[source]
        source: prometheus::Error,
    },
}

/// Outcome of routing one reading
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouteSummary {
    /// Gauges set
    pub applied: usize,
    /// Gauges created for names seen for the first time
    pub created: usize,
    /// Fields that could not be applied
    pub skipped: usize,
}

/// Owns the gauge handles of one gatherer
pub struct MetricRouter {
    registry: Registry,
    prefix: String,
    families: HashMap<String, GaugeVec>,
    dynamic: HashMap<String, Gauge>,
    rejected: HashSet<String>,
}

impl MetricRouter {
    /// Build a router and register the static gauge families of `platform`
    pub fn new(
        registry: Registry,
        prefix: impl Into<String>,
        platform: Platform,
    ) -> Result<Self, RouterError> {
        let prefix = prefix.into();
        let mut families = HashMap::new();

        for metric in platform.static_metrics() {
            let name = metric.name(&prefix);
            let register_err = |source| RouterError::Register {
                name: name.clone(),
                source,
            };
            let family = GaugeVec::new(
                Opts::new(exposition_name(&name).into_owned(), metric.help),
                &[metric.label],
            )
            .map_err(register_err)?;
            registry
                .register(Box::new(family.clone()))
                .map_err(register_err)?;
            families.insert(name, family);
        }

        Ok(Self {
            registry,
            prefix,
            families,
            dynamic: HashMap::new(),
            rejected: HashSet::new(),
        })
    }

    /// Number of gauges created on demand so far
    pub fn dynamic_len(&self) -> usize {
        self.dynamic.len()
    }

    /// Current value of an on-demand gauge, by its full name
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.dynamic.get(name).map(|g| g.get())
    }

    /// Current value of a static gauge for one label value.
    ///
    /// Does not create the labeled series when it is absent.
    pub fn labeled_gauge(&self, name: &str, label_value: &str) -> Option<f64> {
        let gathered = self.families.get(name)?.collect();
        gathered
            .iter()
            .flat_map(|mf| mf.get_metric().iter())
            .find(|m| {
                m.get_label()
                    .iter()
                    .any(|pair| pair.get_value() == label_value)
            })
            .map(|m| m.get_gauge().get_value())
    }

    /// Set every gauge the reading carries.
    ///
    /// Fields that cannot be applied are logged and skipped; the rest of the
    /// reading is still applied.
    pub fn route(&mut self, reading: &Reading) -> RouteSummary {
        debug!("Routing reading: {:?}", reading);

        let mut summary = RouteSummary::default();
        for item in reading.samples(&self.prefix) {
            let sample = match item {
                Ok(sample) => sample,
                Err(skipped) => {
                    warn!("Skipping telemetry field: {}", skipped);
                    summary.skipped += 1;
                    continue;
                }
            };

            match self.apply(&sample) {
                Ok(created) => {
                    summary.applied += 1;
                    if created {
                        summary.created += 1;
                    }
                }
                Err(RouterError::Rejected(_)) => summary.skipped += 1,
                Err(e) => {
                    warn!("Skipping {}: {}", sample.id, e);
                    summary.skipped += 1;
                }
            }
        }
        summary
    }

    /// Returns whether a gauge had to be created
    fn apply(&mut self, sample: &Sample) -> Result<bool, RouterError> {
        match &sample.id {
            MetricId::Dynamic { name } => {
                if let Some(gauge) = self.dynamic.get(name) {
                    gauge.set(sample.value);
                    return Ok(false);
                }
                if self.rejected.contains(name) {
                    return Err(RouterError::Rejected(name.clone()));
                }

                let gauge = match self.register_dynamic(name) {
                    Ok(gauge) => gauge,
                    Err(e) => {
                        self.rejected.insert(name.clone());
                        return Err(e);
                    }
                };
                gauge.set(sample.value);
                self.dynamic.insert(name.clone(), gauge);
                Ok(true)
            }
            MetricId::Static {
                name, label_value, ..
            } => {
                let family = self
                    .families
                    .get(name)
                    .ok_or_else(|| RouterError::UnknownFamily(name.clone()))?;
                family
                    .get_metric_with_label_values(&[label_value.as_str()])
                    .map_err(|source| RouterError::Label {
                        name: name.clone(),
                        source,
                    })?
                    .set(sample.value);
                Ok(false)
            }
        }
    }

    fn register_dynamic(&self, name: &str) -> Result<Gauge, RouterError> {
        let exposed = exposition_name(name);
        let register_err = |source| RouterError::Register {
            name: name.to_string(),
            source,
        };
        let gauge = Gauge::with_opts(Opts::new(exposed.to_string(), ENGINE_METRIC_HELP))
            .map_err(register_err)?;
        self.registry
            .register(Box::new(gauge.clone()))
            .map_err(register_err)?;
        debug!("Registered engine gauge {} as {}", name, exposed);
        Ok(gauge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use igpu_shared::{LinuxReading, WindowsReading};

    fn linux(json: &str) -> Reading {
        Reading::Linux(serde_json::from_str::<LinuxReading>(json).unwrap())
    }

    fn router(platform: Platform) -> MetricRouter {
        MetricRouter::new(Registry::new(), "igpu", platform).unwrap()
    }

    #[test]
    fn test_static_families_registered_up_front() {
        let r = router(Platform::Linux);
        // Vectors without children are not gathered, so look at the descriptors instead.
        assert_eq!(r.families.len(), 5);
        assert!(r.families.contains_key("igpu_frequency_actual_mhz"));
        assert_eq!(r.dynamic_len(), 0);
    }

    #[test]
    fn test_route_linux_reading() {
        let mut r = router(Platform::Linux);
        let summary = r.route(&linux(
            r#"{"engines":{"Render/3D":{"busy":42.5,"unit":"%"}},"frequency":{"requested":1200,"actual":1150,"unit":"MHz"},"imc-bandwidth":{"reads":3.2,"writes":1.1,"unit":"GB/s"},"interrupts":{"count":500,"unit":"irq/s"}}"#,
        ));

        assert_eq!(
            summary,
            RouteSummary {
                applied: 6,
                created: 1,
                skipped: 0
            }
        );
        assert_eq!(r.gauge("igpu_engine_Render/3D_busy_percent"), Some(42.5));
        assert_eq!(
            r.labeled_gauge("igpu_frequency_actual_mhz", "MHz"),
            Some(1150.0)
        );
        assert_eq!(
            r.labeled_gauge("igpu_frequency_requested", "MHz"),
            Some(1200.0)
        );
        assert_eq!(r.labeled_gauge("igpu_imc_bandwidth_reads", "GB/s"), Some(3.2));
        assert_eq!(r.labeled_gauge("igpu_interrupts", "irq/s"), Some(500.0));
        assert_eq!(r.labeled_gauge("igpu_interrupts", "MHz"), None);
    }

    #[test]
    fn test_routing_twice_is_idempotent() {
        let mut r = router(Platform::Linux);
        let reading = linux(r#"{"engines":{"Video/0":{"busy":10,"wait":2}},"interrupts":{"count":7,"unit":"irq/s"}}"#);

        r.route(&reading);
        let second = r.route(&reading);

        assert_eq!(second.created, 0);
        assert_eq!(r.dynamic_len(), 2);
        assert_eq!(r.gauge("igpu_engine_Video/0_busy_percent"), Some(10.0));
        assert_eq!(r.labeled_gauge("igpu_interrupts", "irq/s"), Some(7.0));
    }

    #[test]
    fn test_new_engine_created_and_old_values_kept() {
        let mut r = router(Platform::Linux);
        r.route(&linux(r#"{"engines":{"Render/3D/0":{"busy":5,"sema":1}}}"#));
        let summary = r.route(&linux(
            r#"{"engines":{"Render/3D/0":{"busy":6},"Blitter/0":{"busy":3,"unit":"%"}}}"#,
        ));

        assert_eq!(summary.created, 1);
        assert_eq!(r.dynamic_len(), 3);
        assert_eq!(r.gauge("igpu_engine_Render/3D/0_busy_percent"), Some(6.0));
        assert_eq!(r.gauge("igpu_engine_Render/3D/0_sema_percent"), Some(1.0));
        assert_eq!(r.gauge("igpu_engine_Blitter/0_busy_percent"), Some(3.0));
        assert_eq!(r.gauge("igpu_engine_Blitter/0_unit_percent"), None);
    }

    #[test]
    fn test_non_numeric_field_skipped() {
        let mut r = router(Platform::Linux);
        let summary = r.route(&linux(r#"{"engines":{"Video/0":{"busy":null,"wait":4}}}"#));

        assert_eq!(summary.skipped, 1);
        assert_eq!(r.gauge("igpu_engine_Video/0_busy_percent"), None);
        assert_eq!(r.gauge("igpu_engine_Video/0_wait_percent"), Some(4.0));
    }

    #[test]
    fn test_colliding_exposition_names_skip_later_engine() {
        let mut r = router(Platform::Linux);
        r.route(&linux(r#"{"engines":{"Render/3D":{"busy":1}}}"#));
        let summary = r.route(&linux(r#"{"engines":{"Render_3D":{"busy":2}}}"#));

        assert_eq!(summary.skipped, 1);
        assert_eq!(r.gauge("igpu_engine_Render/3D_busy_percent"), Some(1.0));
        assert_eq!(r.gauge("igpu_engine_Render_3D_busy_percent"), None);

        let again = r.route(&linux(r#"{"engines":{"Render_3D":{"busy":3}}}"#));
        assert_eq!(again.skipped, 1);
    }

    #[test]
    fn test_route_windows_reading() {
        let mut r = router(Platform::Windows);
        let reading = Reading::Windows(WindowsReading {
            name: "GPU0".to_string(),
            utilization: 73.0,
            memory_usage: 512.0,
        });
        r.route(&reading);

        assert_eq!(r.labeled_gauge("igpu_utilization_percent", "GPU0"), Some(73.0));
        assert_eq!(r.labeled_gauge("igpu_memory_usage_mb", "GPU0"), Some(512.0));
        assert_eq!(r.dynamic_len(), 0);
    }

    #[test]
    fn test_platform_mismatch_skips_static_samples() {
        let mut r = router(Platform::Windows);
        let summary = r.route(&linux(r#"{"engines":{}}"#));
        assert_eq!(summary.applied, 0);
        assert_eq!(summary.skipped, 5);
    }

    #[test]
    fn test_exposed_names_are_sanitized() {
        let registry = Registry::new();
        let mut r = MetricRouter::new(registry.clone(), "igpu", Platform::Linux).unwrap();
        r.route(&linux(r#"{"engines":{"Render/3D":{"busy":42.5}}}"#));

        let family = registry
            .gather()
            .into_iter()
            .find(|f| f.get_name() == "igpu_engine_Render_3D_busy_percent")
            .expect("engine gauge gathered");
        assert_eq!(family.get_metric()[0].get_gauge().get_value(), 42.5);
    }
}
