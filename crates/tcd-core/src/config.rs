use std::time::Duration;

use crate::error::CoreError;

pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_EVENT_QUEUE: usize = 1024;

/// Runner tuning knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Task bodies allowed to execute at once. `1` serializes all tasks.
    pub max_concurrent: usize,
    /// Async worker threads, used only when the runner builds its own runtime.
    pub worker_threads: usize,
    /// Thread name prefix for the owned runtime.
    pub thread_name: String,
    /// Default queue capacity for event subscribers.
    pub event_queue_capacity: usize,
    /// How long shutdown waits for running bodies before abandoning them.
    pub shutdown_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            worker_threads: 2,
            thread_name: "tcd-worker".to_string(),
            event_queue_capacity: DEFAULT_EVENT_QUEUE,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl RunnerConfig {
    /// One worker slot: tasks run strictly one after another in submission order.
    pub fn serial() -> Self {
        Self {
            max_concurrent: 1,
            worker_threads: 1,
            ..Self::default()
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_concurrent == 0 {
            return Err(CoreError::InvalidConfig(
                "max_concurrent must be at least 1".into(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(CoreError::InvalidConfig(
                "worker_threads must be at least 1".into(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "event_queue_capacity must be at least 1".into(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(CoreError::InvalidConfig("thread_name is empty".into()));
        }
        Ok(())
    }
}
