//! Gatherer orchestration
//!
//! `Idle -> Starting -> Running -> Stopped`. While running, a reader task
//! frames the command's stdout into candidates and the gatherer task, on
//! every tick of a fixed-period timer, drains the candidates framed since the
//! previous tick, decodes them and routes them into gauges.

use crate::config::GathererConfig;
use crate::decoder::Decoder;
use crate::error::GathererError;
use crate::framer::{read_candidates, Framer, StreamEnd};
use crate::launcher::{self, TelemetryProcess};
use crate::metrics::GathererMetrics;
use crate::router::MetricRouter;
use prometheus::Registry;
use std::fmt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Candidates buffered between the reader and the gatherer task
const CANDIDATE_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GathererState {
    Idle,
    Starting,
    Running,
    Stopped,
}

impl fmt::Display for GathererState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GathererState::Idle => "idle",
            GathererState::Starting => "starting",
            GathererState::Running => "running",
            GathererState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Turns a telemetry stream into gauge updates
pub struct Gatherer {
    config: GathererConfig,
    decoder: Decoder,
    router: MetricRouter,
    metrics: GathererMetrics,
    state: watch::Sender<GathererState>,
}

impl Gatherer {
    /// Build a gatherer whose gauges live in `registry`
    pub fn new(config: GathererConfig, registry: &Registry) -> Result<Self, GathererError> {
        config
            .validate()
            .map_err(|e| GathererError::InvalidConfig(format!("{:#}", e)))?;

        let router = MetricRouter::new(registry.clone(), config.prefix.clone(), config.platform)?;
        let metrics = GathererMetrics::new(&config.prefix)?;
        metrics.register(registry)?;
        let (state, _) = watch::channel(GathererState::Idle);

        Ok(Self {
            decoder: Decoder::new(config.platform),
            config,
            router,
            metrics,
            state,
        })
    }

    pub fn config(&self) -> &GathererConfig {
        &self.config
    }

    /// Follow state changes, including after the gatherer is started
    pub fn state(&self) -> watch::Receiver<GathererState> {
        self.state.subscribe()
    }

    /// Launch the telemetry command and start processing its output.
    ///
    /// Failing to spawn the command or to get its stdout is fatal: the error
    /// is returned and the gatherer ends up `Stopped`.
    pub fn start(self, cancel: CancellationToken) -> Result<RunningGatherer, GathererError> {
        self.state.send_replace(GathererState::Starting);

        let mut process = match launcher::spawn(&self.config) {
            Ok(process) => process,
            Err(e) => {
                error!("Error starting process: {}", e);
                self.state.send_replace(GathererState::Stopped);
                return Err(e);
            }
        };
        let Some(stdout) = process.take_stdout() else {
            let command = process.command().to_string();
            error!("Error creating stdout pipe for '{}'", command);
            self.state.send_replace(GathererState::Stopped);
            return Err(GathererError::MissingStdout { command });
        };

        info!(
            "Started '{}' (pid {})",
            process.command(),
            process
                .id()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        Ok(self.run(stdout, Some(process), cancel))
    }

    /// Process `source` as the telemetry stream. `process`, when given, is
    /// killed once the gatherer stops.
    pub fn run<R>(
        self,
        source: R,
        process: Option<TelemetryProcess>,
        cancel: CancellationToken,
    ) -> RunningGatherer
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let state = self.state.subscribe();
        let task = tokio::spawn(self.process_loop(source, process, cancel));
        RunningGatherer { state, task }
    }

    async fn process_loop<R>(
        mut self,
        source: R,
        process: Option<TelemetryProcess>,
        cancel: CancellationToken,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let period = self.config.refresh;
        let Some(first_tick) = Instant::now().checked_add(period) else {
            error!("Refresh period {:?} is out of range", period);
            if let Some(process) = process {
                process.shutdown().await;
            }
            self.state.send_replace(GathererState::Stopped);
            return;
        };

        let (tx, mut rx) = mpsc::channel(CANDIDATE_QUEUE);
        let reader = tokio::spawn(read_candidates(
            source,
            Framer::new(self.config.max_object_bytes),
            tx,
            cancel.clone(),
            self.metrics.clone(),
        ));
        self.state.send_replace(GathererState::Running);

        let mut ticker = interval_at(first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Gatherer cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if !self.drain(&mut rx, &cancel) {
                        break;
                    }
                }
            }
        }

        rx.close();
        match reader.await {
            Ok(StreamEnd::Closed) => warn!("Telemetry command closed its output"),
            Ok(StreamEnd::ReadError(e)) => error!("Failed reading telemetry output: {}", e),
            Ok(end) => debug!("Telemetry reader stopped: {:?}", end),
            Err(e) => error!("Telemetry reader task failed: {}", e),
        }

        if let Some(process) = process {
            process.shutdown().await;
        }
        self.state.send_replace(GathererState::Stopped);
    }

    /// Handle every candidate queued so far. Returns false once the gatherer
    /// must stop (cancelled, or the stream ended and the queue is empty).
    fn drain(&mut self, rx: &mut mpsc::Receiver<Vec<u8>>, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            match rx.try_recv() {
                Ok(candidate) => self.handle_candidate(&candidate),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle_candidate(&mut self, candidate: &[u8]) {
        match self.decoder.decode(candidate) {
            Ok(reading) => {
                let summary = self.router.route(&reading);
                self.metrics.readings.inc();
                self.metrics.skipped_fields.inc_by(summary.skipped as u64);
                debug!(
                    "Applied reading: {} gauges set, {} created, {} skipped",
                    summary.applied, summary.created, summary.skipped
                );
            }
            Err(e) => {
                error!("JSON decode error: {}", e);
                self.metrics.decode_errors.inc();
            }
        }
    }
}

/// Handle to a started gatherer
pub struct RunningGatherer {
    state: watch::Receiver<GathererState>,
    task: JoinHandle<()>,
}

impl RunningGatherer {
    pub fn state(&self) -> GathererState {
        *self.state.borrow()
    }

    /// Wait for the gatherer task to exit
    pub async fn wait(self) -> Result<(), JoinError> {
        self.task.await
    }
}
