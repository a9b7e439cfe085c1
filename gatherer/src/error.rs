//! Gatherer startup errors

use crate::router::RouterError;

/// Errors that prevent a gatherer from being built or started.
///
/// All of them are fatal for the exporter: without the telemetry command
/// there is nothing to serve.
#[derive(Debug, thiserror::Error)]
pub enum GathererError {
    #[error("invalid gatherer configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("failed to register gatherer metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("failed to write sampler script: {0}")]
    Script(#[source] std::io::Error),

    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no stdout pipe for '{command}'")]
    MissingStdout { command: String },
}
