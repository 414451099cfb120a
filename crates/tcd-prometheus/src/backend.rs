use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
    proto::MetricFamily,
};
use tcd_core::MetricsBackend;
use tcd_model::TaskStatus;
use thiserror::Error;

/// Buckets for queue wait and run time, in seconds.
const SECONDS_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// [`MetricsBackend`] backed by a private prometheus [`Registry`].
///
/// Cloning is cheap; clones share the same collectors.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    submitted: IntCounterVec,
    started: IntCounterVec,
    finished: IntCounterVec,
    cancels: IntCounterVec,
    running: IntGauge,
    queue_seconds: HistogramVec,
    duration_seconds: HistogramVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let submitted = IntCounterVec::new(
            Opts::new("tcd_tasks_submitted_total", "Tasks handed to the runner"),
            &["task"],
        )?;
        let started = IntCounterVec::new(
            Opts::new("tcd_tasks_started_total", "Tasks that acquired a worker slot"),
            &["task"],
        )?;
        let finished = IntCounterVec::new(
            Opts::new("tcd_tasks_finished_total", "Tasks that reached a terminal status"),
            &["task", "outcome"],
        )?;
        let cancels = IntCounterVec::new(
            Opts::new("tcd_cancel_requests_total", "Accepted cancellation requests"),
            &["task"],
        )?;
        let running = IntGauge::new("tcd_tasks_running", "Task bodies currently executing")?;
        let queue_seconds = HistogramVec::new(
            HistogramOpts::new("tcd_task_queue_seconds", "Time spent pending a worker slot")
                .buckets(SECONDS_BUCKETS.to_vec()),
            &["task"],
        )?;
        let duration_seconds = HistogramVec::new(
            HistogramOpts::new("tcd_task_duration_seconds", "Time from start to terminal status")
                .buckets(SECONDS_BUCKETS.to_vec()),
            &["task"],
        )?;

        registry.register(Box::new(submitted.clone()))?;
        registry.register(Box::new(started.clone()))?;
        registry.register(Box::new(finished.clone()))?;
        registry.register(Box::new(cancels.clone()))?;
        registry.register(Box::new(running.clone()))?;
        registry.register(Box::new(queue_seconds.clone()))?;
        registry.register(Box::new(duration_seconds.clone()))?;

        Ok(Self {
            registry,
            submitted,
            started,
            finished,
            cancels,
            running,
            queue_seconds,
            duration_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Renders every collector in the prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.gather(), &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn record_task_submitted(&self, name: &str) {
        self.submitted.with_label_values(&[name]).inc();
    }

    fn record_task_started(&self, name: &str, queued: Duration) {
        self.started.with_label_values(&[name]).inc();
        self.queue_seconds
            .with_label_values(&[name])
            .observe(queued.as_secs_f64());
        self.running.inc();
    }

    fn record_task_finished(&self, name: &str, status: TaskStatus, run_time: Option<Duration>) {
        self.finished
            .with_label_values(&[name, status.as_str()])
            .inc();
        // Tasks cancelled while pending never touched the gauge.
        if let Some(run) = run_time {
            self.running.dec();
            self.duration_seconds
                .with_label_values(&[name])
                .observe(run.as_secs_f64());
        }
    }

    fn record_cancel_requested(&self, name: &str) {
        self.cancels.with_label_values(&[name]).inc();
    }
}
