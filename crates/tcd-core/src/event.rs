use std::time::{Duration, SystemTime};

use tcd_model::{Progress, TaskId, TaskName, TaskStatus};

/// Kind of a [`RunnerEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Task registered and waiting for a worker slot.
    TaskSubmitted,
    /// Worker slot acquired; the body is about to run.
    TaskStarting,
    /// Body reported progress.
    TaskProgress,
    /// Cancellation was requested (the body may still be running).
    CancelRequested,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    /// Finish delivery ran on the interactive thread; the task left the registry.
    TaskAcknowledged,
}

impl EventKind {
    /// Event published when a task settles in `status`.
    ///
    /// Returns `None` for non-terminal statuses.
    pub fn for_terminal(status: TaskStatus) -> Option<Self> {
        match status {
            TaskStatus::Completed => Some(EventKind::TaskCompleted),
            TaskStatus::Failed => Some(EventKind::TaskFailed),
            TaskStatus::Cancelled => Some(EventKind::TaskCancelled),
            TaskStatus::Pending | TaskStatus::Running => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::TaskCompleted | EventKind::TaskFailed | EventKind::TaskCancelled
        )
    }
}

/// Lifecycle notification fanned out to subscribers.
#[derive(Debug, Clone)]
pub struct RunnerEvent {
    pub kind: EventKind,
    pub task: TaskId,
    pub name: TaskName,
    pub at: SystemTime,
    pub progress: Option<Progress>,
    /// Failure text for `TaskFailed`.
    pub reason: Option<String>,
    /// Queue time for `TaskStarting`, run time for terminal events.
    pub elapsed: Option<Duration>,
}

impl RunnerEvent {
    pub fn new(kind: EventKind, task: TaskId, name: impl Into<TaskName>) -> Self {
        Self {
            kind,
            task,
            name: name.into(),
            at: SystemTime::now(),
            progress: None,
            reason: None,
            elapsed: None,
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}
