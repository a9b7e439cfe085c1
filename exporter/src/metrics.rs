//! Prometheus text exposition of the exporter's registry

use prometheus::{Encoder, Registry, TextEncoder};

/// Render all metrics registered in `registry` to Prometheus text format.
pub fn encode_metrics(registry: &Registry) -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
