//! Prometheus metrics backend for the tcd task runner.
//!
//! This crate provides a [`PrometheusMetrics`] implementation of [`tcd_core::MetricsBackend`] that exposes metrics in Prometheus format.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use tcd_core::{EventLoop, RunnerConfig, TaskRunner};
//! use tcd_prometheus::PrometheusMetrics;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::new()?;
//! let event_loop = EventLoop::new();
//!
//! let runner = TaskRunner::builder(RunnerConfig::default())
//!     .with_dispatcher(event_loop.dispatcher())
//!     .with_metrics(Arc::new(metrics.clone()))
//!     .build()?;
//!
//! // Scrape
//! let text = metrics.encode_text()?;
//! assert!(text.is_empty() || text.contains("tcd_"));
//! # drop(runner);
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `tcd_tasks_submitted_total{task}` - Counter
//! - `tcd_tasks_started_total{task}` - Counter
//! - `tcd_tasks_finished_total{task, outcome}` - Counter
//! - `tcd_cancel_requests_total{task}` - Counter
//! - `tcd_tasks_running` - Gauge
//! - `tcd_task_queue_seconds{task}` - Histogram
//! - `tcd_task_duration_seconds{task}` - Histogram
//!
//! ## HTTP Server
//! This crate does NOT provide an HTTP server for a `/metrics` endpoint.
//! Serve [`PrometheusMetrics::encode_text`] from whatever the host already runs.

mod backend;
pub use backend::{MetricsError, PrometheusMetrics};

pub use prometheus::{Encoder, Registry, TextEncoder};
