//! Telemetry readings
//!
//! A reading is one decoded JSON object from the telemetry command. Its shape
//! depends on the platform: `intel_gpu_top -J` on Linux, the bundled
//! PowerShell sampler on Windows.

use super::metric::{
    engine_metric_name, MetricId, Platform, Sample, FREQUENCY_ACTUAL, FREQUENCY_REQUESTED,
    IMC_BANDWIDTH_READS, IMC_BANDWIDTH_WRITES, INTERRUPTS, MEMORY_USAGE, UTILIZATION,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Key inside an engine object that carries the unit marker, not a value
pub const ENGINE_UNIT_KEY: &str = "unit";

/// Sub-metrics of one engine (`busy`, `sema`, `wait`, `unit`)
pub type EngineStats = BTreeMap<String, Value>;

/// Snapshot emitted by `intel_gpu_top -J`.
///
/// Sections missing from the object decode to zero with an empty unit.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LinuxReading {
    /// Engine name (e.g. "Render/3D/0") to its sub-metrics
    pub engines: BTreeMap<String, EngineStats>,

    pub frequency: Frequency,

    #[serde(rename = "imc-bandwidth")]
    pub imc_bandwidth: ImcBandwidth,

    pub interrupts: Interrupts,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Frequency {
    pub requested: f64,
    pub actual: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImcBandwidth {
    pub reads: f64,
    pub writes: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Interrupts {
    pub count: f64,
    pub unit: String,
}

/// Snapshot emitted by the Windows sampler script
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowsReading {
    /// GPU identifier, used as the `gpu` label
    #[serde(rename = "Name", alias = "name")]
    pub name: String,

    /// Utilization in percent
    #[serde(rename = "Utilization", alias = "utilization")]
    pub utilization: f64,

    /// Memory usage in megabytes
    #[serde(rename = "MemoryUsage", alias = "memory_usage", alias = "memoryUsage")]
    pub memory_usage: f64,
}

/// An engine field that could not be turned into a gauge value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("engine '{engine}' field '{field}' is not numeric: {value}")]
pub struct SkippedField {
    pub engine: String,
    pub field: String,
    pub value: String,
}

/// A decoded reading from either platform
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Linux(LinuxReading),
    Windows(WindowsReading),
}

impl Reading {
    pub fn platform(&self) -> Platform {
        match self {
            Reading::Linux(_) => Platform::Linux,
            Reading::Windows(_) => Platform::Windows,
        }
    }

    /// Every gauge value this reading carries, in a stable order.
    ///
    /// Fields that cannot be routed are returned as `Err` items so callers
    /// can skip them without dropping the rest of the reading.
    pub fn samples(&self, prefix: &str) -> Vec<Result<Sample, SkippedField>> {
        match self {
            Reading::Linux(r) => r.samples(prefix),
            Reading::Windows(r) => r.samples(prefix).into_iter().map(Ok).collect(),
        }
    }
}

impl From<LinuxReading> for Reading {
    fn from(r: LinuxReading) -> Self {
        Reading::Linux(r)
    }
}

impl From<WindowsReading> for Reading {
    fn from(r: WindowsReading) -> Self {
        Reading::Windows(r)
    }
}

impl LinuxReading {
    /// Engine samples first, then the five static gauges
    pub fn samples(&self, prefix: &str) -> Vec<Result<Sample, SkippedField>> {
        let mut out = Vec::with_capacity(self.engines.len() * 3 + 5);

        for (engine, stats) in &self.engines {
            for (field, value) in stats {
                if field == ENGINE_UNIT_KEY {
                    continue;
                }
                let item = match value.as_f64() {
                    Some(v) => Ok(Sample {
                        id: MetricId::Dynamic {
                            name: engine_metric_name(prefix, engine, field),
                        },
                        value: v,
                    }),
                    None => Err(SkippedField {
                        engine: engine.clone(),
                        field: field.clone(),
                        value: value.to_string(),
                    }),
                };
                out.push(item);
            }
        }

        let freq_unit = &self.frequency.unit;
        let bw_unit = &self.imc_bandwidth.unit;
        out.push(Ok(Sample::labeled(
            &FREQUENCY_REQUESTED,
            prefix,
            freq_unit,
            self.frequency.requested,
        )));
        out.push(Ok(Sample::labeled(
            &FREQUENCY_ACTUAL,
            prefix,
            freq_unit,
            self.frequency.actual,
        )));
        out.push(Ok(Sample::labeled(
            &IMC_BANDWIDTH_READS,
            prefix,
            bw_unit,
            self.imc_bandwidth.reads,
        )));
        out.push(Ok(Sample::labeled(
            &IMC_BANDWIDTH_WRITES,
            prefix,
            bw_unit,
            self.imc_bandwidth.writes,
        )));
        out.push(Ok(Sample::labeled(
            &INTERRUPTS,
            prefix,
            &self.interrupts.unit,
            self.interrupts.count,
        )));

        out
    }
}

impl WindowsReading {
    pub fn samples(&self, prefix: &str) -> Vec<Sample> {
        vec![
            Sample::labeled(&UTILIZATION, prefix, &self.name, self.utilization),
            Sample::labeled(&MEMORY_USAGE, prefix, &self.name, self.memory_usage),
        ]
    }
}
