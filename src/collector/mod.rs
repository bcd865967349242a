//! Multi-collector orchestration.
//!
//! A subsystem (`host`, `perfcounter`) is a [`MultiCollector`] holding named
//! [`SubCollector`]s. Every scrape runs all of them in parallel on scoped
//! threads; each writes its metrics into a shared bounded [`MetricSink`]. A
//! failing or panicking sub-collector is reported but never stops its
//! siblings.

pub mod host;
pub mod perfcounter;

use std::any::Any;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics::Metric;
use crate::pdh::PdhError;

/// Capacity of the metric queue used by [`MultiCollector::scrape`].
pub const SINK_CAPACITY: usize = 1024;

/// Error type for subsystem build, scrape and close failures.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Pdh(#[from] PdhError),
    #[error("unknown collector {name:?} in subsystem {subsystem:?} (known: {})", .known.join(", "))]
    UnknownCollector {
        subsystem: String,
        name: String,
        known: Vec<String>,
    },
    #[error("failed to build {subsystem}/{collector}: {source}")]
    Build {
        subsystem: String,
        collector: String,
        #[source]
        source: Box<CollectError>,
    },
    #[error("{subsystem}: {} of {total} collectors failed: {}", .failures.len(), join_failures(.failures))]
    Partial {
        subsystem: String,
        total: usize,
        failures: Vec<(String, CollectError)>,
    },
    #[error("metric sink closed")]
    SinkClosed,
    #[error("subsystem {subsystem:?} has not been built")]
    NotBuilt { subsystem: String },
    #[error("subsystem {subsystem:?} is already built")]
    AlreadyBuilt { subsystem: String },
    #[error("collector {collector:?} panicked: {message}")]
    Panicked { collector: String, message: String },
    #[error("failed to close {subsystem}: {}", join_failures(.failures))]
    Close {
        subsystem: String,
        failures: Vec<(String, CollectError)>,
    },
}

impl CollectError {
    /// Names of the failed sub-collectors of a `Partial` or `Close` error.
    pub fn failed_collectors(&self) -> Vec<&str> {
        match self {
            Self::Partial { failures, .. } | Self::Close { failures, .. } => {
                failures.iter().map(|(name, _)| name.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn join_failures(failures: &[(String, CollectError)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{}: {}", name, err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Write end of the bounded metric queue shared by the sub-collectors of a scrape.
#[derive(Debug, Clone)]
pub struct MetricSink {
    tx: SyncSender<Metric>,
}

impl MetricSink {
    pub fn new(tx: SyncSender<Metric>) -> Self {
        Self { tx }
    }

    /// Creates a sink and the receiver that drains it.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Metric>) {
        let (tx, rx) = sync_channel(capacity);
        (Self::new(tx), rx)
    }

    /// Blocks while the queue is full.
    pub fn send(&self, metric: Metric) -> Result<(), CollectError> {
        self.tx.send(metric).map_err(|_| CollectError::SinkClosed)
    }
}

/// One independently collected group of metrics.
///
/// Implementations own their native resources; `close` releases them and must
/// tolerate being called after a failed collect.
pub trait SubCollector: Send + Sync {
    fn collect(&self, sink: &MetricSink) -> Result<(), CollectError>;

    fn close(&self) -> Result<(), CollectError>;
}

type BuildFn = Box<dyn FnOnce() -> Result<Box<dyn SubCollector>, CollectError> + Send>;

/// A named sub-collector constructor.
pub struct Registration {
    name: String,
    build: BuildFn,
}

impl Registration {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn SubCollector>, CollectError> + Send + 'static,
    {
        Self {
            name: name.into(),
            build: Box::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unbuilt,
    Built,
    Closed,
}

/// Result of [`MultiCollector::scrape`].
#[derive(Debug)]
pub struct Scrape {
    pub metrics: Vec<Metric>,
    /// Set when at least one sub-collector failed; `metrics` still holds
    /// everything the others produced.
    pub error: Option<CollectError>,
    pub duration: Duration,
}

/// Fan-out/fan-in runner for the sub-collectors of one subsystem.
pub struct MultiCollector {
    namespace: String,
    subsystem: String,
    state: State,
    active: Vec<(String, Box<dyn SubCollector>)>,
}

impl MultiCollector {
    pub fn new(namespace: impl Into<String>, subsystem: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            subsystem: subsystem.into(),
            state: State::Unbuilt,
            active: Vec::new(),
        }
    }

    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Names of the built sub-collectors, in build order.
    pub fn active(&self) -> Vec<&str> {
        self.active.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Builds the `enabled` sub-collectors, in the order given.
    ///
    /// Every name must match a registration. The first build failure closes
    /// what was already built and fails the whole subsystem.
    pub fn build(
        &mut self,
        enabled: &[String],
        registrations: Vec<Registration>,
    ) -> Result<(), CollectError> {
        if self.state != State::Unbuilt {
            return Err(CollectError::AlreadyBuilt {
                subsystem: self.subsystem.clone(),
            });
        }

        let known: Vec<String> = registrations.iter().map(|r| r.name.clone()).collect();
        let mut builders: HashMap<String, BuildFn> = registrations
            .into_iter()
            .map(|r| (r.name, r.build))
            .collect();

        for name in enabled {
            if !known.contains(name) {
                return Err(CollectError::UnknownCollector {
                    subsystem: self.subsystem.clone(),
                    name: name.clone(),
                    known,
                });
            }
        }

        let mut built: Vec<(String, Box<dyn SubCollector>)> = Vec::with_capacity(enabled.len());
        for name in enabled {
            // Duplicate names were consumed by their first occurrence.
            let Some(build) = builders.remove(name) else {
                continue;
            };
            match build() {
                Ok(collector) => {
                    debug!(subsystem = %self.subsystem, collector = %name, "built collector");
                    built.push((name.clone(), collector));
                }
                Err(err) => {
                    for (other, collector) in &built {
                        if let Err(close_err) = collector.close() {
                            warn!(
                                subsystem = %self.subsystem,
                                collector = %other,
                                error = %close_err,
                                "failed to close collector after build failure"
                            );
                        }
                    }
                    return Err(CollectError::Build {
                        subsystem: self.subsystem.clone(),
                        collector: name.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }

        info!(
            subsystem = %self.subsystem,
            collectors = ?built.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            "subsystem ready"
        );
        self.active = built;
        self.state = State::Built;
        Ok(())
    }

    /// Runs every active sub-collector once, in parallel, writing into `sink`.
    ///
    /// The sink must be drained concurrently. Returns after every sub-collector
    /// has finished; failures are combined into [`CollectError::Partial`].
    /// After [`MultiCollector::close`] nothing is collected.
    pub fn collect(&self, sink: &MetricSink) -> Result<(), CollectError> {
        match self.state {
            State::Unbuilt => {
                return Err(CollectError::NotBuilt {
                    subsystem: self.subsystem.clone(),
                });
            }
            State::Closed => return Ok(()),
            State::Built => {}
        }

        let started = Instant::now();
        let (err_tx, err_rx) = sync_channel::<(String, CollectError)>(self.active.len().max(1));

        let durations: Vec<(&str, Duration)> = thread::scope(|scope| {
            let workers: Vec<_> = self
                .active
                .iter()
                .map(|(name, collector)| {
                    let sink = sink.clone();
                    let err_tx = err_tx.clone();
                    let worker = scope.spawn(move || {
                        let begin = Instant::now();
                        if let Err(err) = collector.collect(&sink) {
                            let _ = err_tx.send((name.clone(), err));
                        }
                        begin.elapsed()
                    });
                    (name.as_str(), worker)
                })
                .collect();

            workers
                .into_iter()
                .map(|(name, worker)| match worker.join() {
                    Ok(elapsed) => (name, elapsed),
                    Err(payload) => {
                        let _ = err_tx.send((
                            name.to_string(),
                            CollectError::Panicked {
                                collector: name.to_string(),
                                message: panic_message(payload.as_ref()),
                            },
                        ));
                        (name, started.elapsed())
                    }
                })
                .collect()
        });
        drop(err_tx);

        let mut failures: Vec<(String, CollectError)> = err_rx.into_iter().collect();
        failures.sort_by(|a, b| a.0.cmp(&b.0));

        let mut sink_error = None;
        for (name, elapsed) in &durations {
            let failure = failures.iter().find(|(failed, _)| failed == name);
            if let Some((_, err)) = failure {
                warn!(subsystem = %self.subsystem, collector = %name, error = %err, "collector failed");
            }
            if sink_error.is_none()
                && let Err(err) = self.emit_self_metrics(sink, name, *elapsed, failure.is_none())
            {
                sink_error = Some(err);
            }
        }
        debug!(
            subsystem = %self.subsystem,
            elapsed_ms = started.elapsed().as_millis() as u64,
            failed = failures.len(),
            "collected subsystem"
        );

        if !failures.is_empty() {
            if let Some(err) = &sink_error {
                warn!(subsystem = %self.subsystem, error = %err, "self metrics not delivered");
            }
            return Err(CollectError::Partial {
                subsystem: self.subsystem.clone(),
                total: self.active.len(),
                failures,
            });
        }
        match sink_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Collects into an internal queue and returns everything produced.
    pub fn scrape(&self) -> Scrape {
        let started = Instant::now();
        let (sink, rx) = MetricSink::bounded(SINK_CAPACITY);

        let (metrics, result) = thread::scope(|scope| {
            let worker = scope.spawn(move || self.collect(&sink));
            let metrics: Vec<Metric> = rx.iter().collect();
            let result = worker.join().unwrap_or_else(|payload| {
                Err(CollectError::Panicked {
                    collector: self.subsystem.clone(),
                    message: panic_message(payload.as_ref()),
                })
            });
            (metrics, result)
        });

        Scrape {
            metrics,
            error: result.err(),
            duration: started.elapsed(),
        }
    }

    /// Closes every sub-collector, even after failures. Idempotent.
    pub fn close(&mut self) -> Result<(), CollectError> {
        if self.state == State::Closed {
            return Ok(());
        }
        self.state = State::Closed;

        let mut failures = Vec::new();
        for (name, collector) in &self.active {
            if let Err(err) = collector.close() {
                warn!(subsystem = %self.subsystem, collector = %name, error = %err, "failed to close collector");
                failures.push((name.clone(), err));
            }
        }
        info!(subsystem = %self.subsystem, "subsystem closed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CollectError::Close {
                subsystem: self.subsystem.clone(),
                failures,
            })
        }
    }

    fn emit_self_metrics(
        &self,
        sink: &MetricSink,
        collector: &str,
        elapsed: Duration,
        success: bool,
    ) -> Result<(), CollectError> {
        sink.send(
            Metric::gauge(
                format!("{}_exporter_collector_duration_seconds", self.namespace),
                "Duration of a collection.",
                elapsed.as_secs_f64(),
            )
            .with_label("subsystem", self.subsystem.as_str())
            .with_label("collector", collector),
        )?;
        sink.send(
            Metric::gauge(
                format!("{}_exporter_collector_success", self.namespace),
                "Whether the collector was successful.",
                if success { 1.0 } else { 0.0 },
            )
            .with_label("subsystem", self.subsystem.as_str())
            .with_label("collector", collector),
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
