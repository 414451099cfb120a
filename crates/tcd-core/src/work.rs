//! What a task body sees: its context, its error type and the outcome the host receives.

use std::{fmt, sync::Arc};

use tcd_model::{Progress, TaskId, TaskStatus};
use tokio_util::sync::CancellationToken;

use crate::task::TaskCore;

/// Why a task body stopped early.
///
/// Any error convertible into [`anyhow::Error`] converts into `WorkError::Failed`, so `?` works
/// inside bodies. `WorkError` deliberately does not implement `std::error::Error`.
pub enum WorkError {
    /// The body stopped because cancellation was requested.
    Cancelled,
    Failed(anyhow::Error),
}

pub type WorkResult<T> = Result<T, WorkError>;

impl WorkError {
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        WorkError::Failed(anyhow::Error::msg(message))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkError::Cancelled)
    }
}

impl<E> From<E> for WorkError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        WorkError::Failed(err.into())
    }
}

impl fmt::Debug for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkError::Cancelled => f.write_str("Cancelled"),
            WorkError::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkError::Cancelled => f.write_str("cancelled"),
            WorkError::Failed(err) => write!(f, "{err:#}"),
        }
    }
}

/// Final result of a task, delivered once to the finish listener.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Failed(anyhow::Error),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn status(&self) -> TaskStatus {
        match self {
            Outcome::Completed(_) => TaskStatus::Completed,
            Outcome::Failed(_) => TaskStatus::Failed,
            Outcome::Cancelled => TaskStatus::Cancelled,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Failure text including the cause chain.
    pub fn reason(&self) -> Option<String> {
        self.error().map(|err| format!("{err:#}"))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Completed(v) => Outcome::Completed(f(v)),
            Outcome::Failed(err) => Outcome::Failed(err),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }
}

/// Read side of a task's cancellation flag.
///
/// The flag only ever goes from unset to set. Once it is set the task finishes as cancelled
/// whatever the body returns, even if the body never looked.
#[derive(Clone)]
pub struct CancelCheck {
    token: CancellationToken,
}

impl CancelCheck {
    pub(crate) fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Err(WorkError::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> WorkResult<()> {
        if self.is_cancelled() {
            Err(WorkError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Posts progress snapshots to the task's listeners without blocking.
#[derive(Clone)]
pub struct ProgressReporter {
    core: Arc<TaskCore>,
}

impl ProgressReporter {
    pub(crate) fn new(core: Arc<TaskCore>) -> Self {
        Self { core }
    }

    /// Dropped silently unless the task is running.
    pub fn report(&self, progress: Progress) {
        self.core.emit_progress(progress);
    }

    /// Reports a percentage, bounded to `0..=100`.
    pub fn percent(&self, percent: i64) {
        self.report(Progress::from_percent(percent));
    }
}

/// Handed to every task body.
#[derive(Clone)]
pub struct WorkContext {
    cancel: CancelCheck,
    reporter: ProgressReporter,
}

impl WorkContext {
    pub(crate) fn new(core: Arc<TaskCore>) -> Self {
        Self {
            cancel: core.cancel_check().clone(),
            reporter: ProgressReporter::new(core),
        }
    }

    pub fn id(&self) -> &TaskId {
        self.reporter.core.id()
    }

    pub fn name(&self) -> &str {
        self.reporter.core.name()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Early-exit point: `ctx.check_cancelled()?`.
    pub fn check_cancelled(&self) -> WorkResult<()> {
        self.cancel.check()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn report(&self, progress: Progress) {
        self.reporter.report(progress);
    }

    pub fn percent(&self, percent: i64) {
        self.reporter.percent(percent);
    }

    pub fn cancel_check(&self) -> &CancelCheck {
        &self.cancel
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }
}
