use tcd_model::{TaskId, TaskStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid runner config: {0}")]
    InvalidConfig(String),

    #[error("failed to start worker runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("task {0} already reached a terminal state")]
    AlreadyTerminal(TaskId),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("illegal transition for task {id}: {from} -> {to}")]
    IllegalTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("dispatcher is closed; callback dropped")]
    DispatcherClosed,

    #[error("another instance is already running (pid {pid})")]
    InstanceRunning { pid: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
