//! Exporter configuration
//!
//! Every option is a flag with an environment variable fallback, so the
//! exporter can be configured either way in containers.

use anyhow::{Context, Result};
use clap::Parser;
use igpu_gatherer::framer::DEFAULT_MAX_OBJECT_BYTES;
use igpu_gatherer::GathererConfig;
use igpu_shared::utils::parse_duration;
use igpu_shared::Platform;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

#[derive(Parser, Debug, Clone)]
#[command(name = "intel-gpu-exporter")]
#[command(about = "Prometheus exporter for Intel GPU telemetry", long_about = None)]
#[command(version)]
pub struct Args {
    /// Device selector for the telemetry command (intel_gpu_top -d)
    #[arg(long, env = "EXPORTER_DEVICE", default_value = "")]
    pub device: String,

    /// Refresh period for metrics updates (e.g. "5s", "500ms")
    #[arg(long, env = "EXPORTER_REFRESH", default_value = "5s")]
    pub refresh: String,

    /// Port to serve metrics
    #[arg(long, env = "EXPORTER_PORT", default_value_t = 9091)]
    pub port: u16,

    /// Log level: TRACE, DEBUG, INFO, WARN or ERROR
    #[arg(long = "log-level", env = "EXPORTER_LOGLVL", default_value = "INFO")]
    pub log_level: String,

    /// Additional args to pass to the gatherer command
    #[arg(
        long = "additional-args",
        env = "EXPORTER_ARGS",
        default_value = "",
        allow_hyphen_values = true
    )]
    pub additional_args: String,

    /// Address to bind the HTTP server to
    #[arg(long = "listen-address", env = "EXPORTER_LISTEN", default_value = "0.0.0.0")]
    pub listen_address: IpAddr,

    /// Prefix of every exported metric name
    #[arg(long, env = "EXPORTER_PREFIX", default_value = "igpu")]
    pub prefix: String,

    /// Telemetry source: "linux" or "windows" (default: the build platform)
    #[arg(long, env = "EXPORTER_PLATFORM")]
    pub platform: Option<Platform>,

    /// Largest JSON object accepted from the telemetry command, in bytes
    #[arg(
        long = "max-object-bytes",
        env = "EXPORTER_MAX_OBJECT_BYTES",
        default_value_t = DEFAULT_MAX_OBJECT_BYTES
    )]
    pub max_object_bytes: usize,
}

/// Log verbosity accepted by `--log-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive for `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => anyhow::bail!(
                "unknown log level '{}'. Options are 'TRACE', 'DEBUG', 'INFO', 'WARN', 'ERROR'",
                s
            ),
        }
    }
}

/// Resolved exporter configuration
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// HTTP listen address for /metrics, /healthz and /readyz
    pub listen_addr: SocketAddr,

    pub log_level: LogLevel,

    pub gatherer: GathererConfig,
}

impl ExporterConfig {
    pub fn from_args(args: Args) -> Result<Self> {
        let log_level: LogLevel = args.log_level.parse()?;
        let refresh = parse_duration(&args.refresh)
            .with_context(|| format!("bad refresh period '{}'", args.refresh))?;

        let device = Some(args.device).filter(|d| !d.trim().is_empty());
        let gatherer = GathererConfig {
            platform: args.platform.unwrap_or_else(Platform::detect),
            device,
            refresh,
            additional_args: args.additional_args,
            prefix: args.prefix,
            max_object_bytes: args.max_object_bytes,
        };
        gatherer.validate().context("Invalid configuration")?;

        Ok(Self {
            listen_addr: SocketAddr::new(args.listen_address, args.port),
            log_level,
            gatherer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Result<ExporterConfig> {
        let args = Args::try_parse_from(std::iter::once("intel-gpu-exporter").chain(args.iter().copied()))?;
        ExporterConfig::from_args(args)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.listen_addr.port(), 9091);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.gatherer.refresh, Duration::from_secs(5));
        assert_eq!(config.gatherer.device, None);
        assert_eq!(config.gatherer.prefix, "igpu");
        assert_eq!(config.gatherer.platform, Platform::detect());
    }

    #[test]
    fn test_flags() {
        let config = parse(&[
            "--device",
            "drm:/dev/dri/card0",
            "--refresh",
            "500ms",
            "--port",
            "9100",
            "--log-level",
            "debug",
            "--additional-args",
            "-o -",
            "--platform",
            "windows",
            "--listen-address",
            "127.0.0.1",
        ])
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.gatherer.refresh, Duration::from_millis(500));
        assert_eq!(config.gatherer.device.as_deref(), Some("drm:/dev/dri/card0"));
        assert_eq!(config.gatherer.additional_args, "-o -");
        assert_eq!(config.gatherer.platform, Platform::Windows);
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(parse(&["--log-level", "verbose"]).is_err());
        assert!(parse(&["--refresh", "soon"]).is_err());
        assert!(parse(&["--refresh", "0s"]).is_err());
        assert!(parse(&["--refresh", "1e19"]).is_err());
        assert!(parse(&["--prefix", "gpu-metrics"]).is_err());
        assert!(parse(&["--platform", "macos"]).is_err());
    }

    #[test]
    fn test_log_level_case_insensitive() {
        assert_eq!("Trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("WARN".parse::<LogLevel>().unwrap().as_filter(), "warn");
    }
}
