use std::time::Duration;

use tcd_model::TaskStatus;

/// Metrics sink the runner reports task lifecycle to.
///
/// Called on worker threads and on the interactive thread; implementations must not block.
pub trait MetricsBackend: Send + Sync + 'static {
    fn record_task_submitted(&self, name: &str);

    /// `queued` is the time spent in `Pending` waiting for a worker slot.
    fn record_task_started(&self, name: &str, queued: Duration);

    /// `run_time` is `None` for tasks that never started.
    fn record_task_finished(&self, name: &str, status: TaskStatus, run_time: Option<Duration>);

    fn record_cancel_requested(&self, name: &str);
}

/// Backend that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl MetricsBackend for NoOpMetrics {
    #[inline]
    fn record_task_submitted(&self, _name: &str) {}
    #[inline]
    fn record_task_started(&self, _name: &str, _queued: Duration) {}
    #[inline]
    fn record_task_finished(&self, _name: &str, _status: TaskStatus, _run_time: Option<Duration>) {}
    #[inline]
    fn record_cancel_requested(&self, _name: &str) {}
}
