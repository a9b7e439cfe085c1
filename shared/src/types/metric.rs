//! Gauge identities and metric naming
//!
//! Metric names follow the layout existing dashboards rely on:
//! `<prefix>_engine_<engine>_<submetric>_percent` for per-engine gauges and
//! fixed `<prefix>_<suffix>` names for the static gauges of each platform.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Telemetry source platform. Decides the child command, the reading shape
/// and the static gauge set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    /// Platform the binary was built for
    pub fn detect() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    /// Gauges registered at startup for this platform
    pub fn static_metrics(&self) -> &'static [StaticMetric] {
        match self {
            Platform::Linux => &LINUX_STATIC_METRICS,
            Platform::Windows => &WINDOWS_STATIC_METRICS,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::Windows => write!(f, "windows"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform '{0}', expected 'linux' or 'windows'")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "windows" => Ok(Platform::Windows),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}

/// A gauge family with a fixed name and a single label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticMetric {
    pub suffix: &'static str,
    pub help: &'static str,
    pub label: &'static str,
}

impl StaticMetric {
    /// Full metric name under `prefix`
    pub fn name(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.suffix)
    }
}

pub const FREQUENCY_REQUESTED: StaticMetric = StaticMetric {
    suffix: "frequency_requested",
    help: "Requested GPU frequency",
    label: "unit",
};

pub const FREQUENCY_ACTUAL: StaticMetric = StaticMetric {
    suffix: "frequency_actual_mhz",
    help: "Actual GPU frequency",
    label: "unit",
};

pub const IMC_BANDWIDTH_READS: StaticMetric = StaticMetric {
    suffix: "imc_bandwidth_reads",
    help: "Memory controller read bandwidth",
    label: "unit",
};

pub const IMC_BANDWIDTH_WRITES: StaticMetric = StaticMetric {
    suffix: "imc_bandwidth_writes",
    help: "Memory controller write bandwidth",
    label: "unit",
};

pub const INTERRUPTS: StaticMetric = StaticMetric {
    suffix: "interrupts",
    help: "GPU interrupt rate",
    label: "unit",
};

pub const UTILIZATION: StaticMetric = StaticMetric {
    suffix: "utilization_percent",
    help: "GPU engine utilization in percent",
    label: "gpu",
};

pub const MEMORY_USAGE: StaticMetric = StaticMetric {
    suffix: "memory_usage_mb",
    help: "GPU memory usage in megabytes",
    label: "gpu",
};

pub const LINUX_STATIC_METRICS: [StaticMetric; 5] = [
    FREQUENCY_REQUESTED,
    FREQUENCY_ACTUAL,
    IMC_BANDWIDTH_READS,
    IMC_BANDWIDTH_WRITES,
    INTERRUPTS,
];

pub const WINDOWS_STATIC_METRICS: [StaticMetric; 2] = [UTILIZATION, MEMORY_USAGE];

/// Help text for per-engine gauges
pub const ENGINE_METRIC_HELP: &str = "GPU engine utilization in percent";

/// Identity of one gauge: the router keys its gauge handles on this
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricId {
    /// Member of a pre-registered family, selected by one label value
    Static {
        name: String,
        label_name: &'static str,
        label_value: String,
    },
    /// Unlabeled gauge created the first time its name is seen
    Dynamic { name: String },
}

impl MetricId {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, MetricId::Dynamic { .. })
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricId::Static {
                name,
                label_name,
                label_value,
            } => write!(f, "{}{{{}=\"{}\"}}", name, label_name, label_value),
            MetricId::Dynamic { name } => write!(f, "{}", name),
        }
    }
}

/// One value destined for one gauge
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: MetricId,
    pub value: f64,
}

impl Sample {
    pub fn labeled(metric: &StaticMetric, prefix: &str, label_value: &str, value: f64) -> Self {
        Self {
            id: MetricId::Static {
                name: metric.name(prefix),
                label_name: metric.label,
                label_value: label_value.to_string(),
            },
            value,
        }
    }
}

/// Name of the gauge for one engine sub-metric
pub fn engine_metric_name(prefix: &str, engine: &str, submetric: &str) -> String {
    format!("{}_engine_{}_{}_percent", prefix, engine, submetric)
}

fn is_name_char(index: usize, c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':' || (index > 0 && c.is_ascii_digit())
}

/// Whether `name` is accepted as-is by the text exposition format
pub fn is_valid_metric_name(name: &str) -> bool {
    !name.is_empty() && name.chars().enumerate().all(|(i, c)| is_name_char(i, c))
}

/// Name a gauge is registered under.
///
/// Engine names such as `Render/3D/0` carry characters the exposition format
/// rejects; they are replaced by `_` and a leading digit gets a `_` prefix.
pub fn exposition_name(identity: &str) -> Cow<'_, str> {
    if is_valid_metric_name(identity) {
        return Cow::Borrowed(identity);
    }

    let mut out = String::with_capacity(identity.len() + 1);
    for (i, c) in identity.chars().enumerate() {
        if i == 0 && c.is_ascii_digit() {
            out.push('_');
            out.push(c);
        } else if is_name_char(i, c) {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    Cow::Owned(out)
}
