//! Reporting of faults that must not be swallowed silently.
//!
//! A fault is a programming error on the runner side (an impossible state transition, a
//! dispatcher that went away, a subscriber that died) or a panic escaping to the top of a
//! thread. Work failures are *not* faults: they are delivered as [`Outcome::Failed`].
//!
//! [`Outcome::Failed`]: crate::Outcome::Failed

use std::{
    any::Any,
    cell::Cell,
    fmt,
    panic::{self, PanicHookInfo},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tcd_model::TaskId;
use tracing::{debug, error};

/// Where a fault was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSource {
    Runner,
    Dispatcher,
    Subscriber,
    Listener,
    Panic,
}

impl FaultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultSource::Runner => "runner",
            FaultSource::Dispatcher => "dispatcher",
            FaultSource::Subscriber => "subscriber",
            FaultSource::Listener => "listener",
            FaultSource::Panic => "panic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fault {
    pub source: FaultSource,
    pub message: String,
    pub task: Option<TaskId>,
}

impl Fault {
    pub fn new(source: FaultSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
            task: None,
        }
    }

    pub fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task {
            Some(task) => write!(f, "[{}] task {}: {}", self.source.as_str(), task, self.message),
            None => write!(f, "[{}] {}", self.source.as_str(), self.message),
        }
    }
}

/// Host's top-level error handler.
///
/// Called from whatever thread detected the fault; implementations that touch UI state must
/// marshal to their own thread.
pub trait FaultHandler: Send + Sync + 'static {
    fn report(&self, fault: &Fault);
}

/// Default handler: logs the fault at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFaults;

impl FaultHandler for LogFaults {
    fn report(&self, fault: &Fault) {
        error!(
            source = fault.source.as_str(),
            task = fault.task.as_ref().map(TaskId::as_str).unwrap_or("-"),
            "{}",
            fault.message
        );
    }
}

thread_local! {
    static CAUGHT: Cell<bool> = const { Cell::new(false) };
}

struct Restore(bool);

impl Drop for Restore {
    fn drop(&mut self) {
        CAUGHT.with(|c| c.set(self.0));
    }
}

/// Runs `f` in a region whose panics are caught and reported by the caller.
///
/// The panic hook installed by [`install_panic_hook`] stays quiet inside such regions.
pub(crate) fn caught<R>(f: impl FnOnce() -> R) -> R {
    let _restore = Restore(CAUGHT.with(|c| c.replace(true)));
    f()
}

/// Future adapter applying [`caught`] to every poll.
pub(crate) struct Caught<F> {
    inner: Pin<Box<F>>,
}

impl<F> Caught<F> {
    pub(crate) fn new(inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for Caught<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        caught(move || inner.poll(cx))
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

type Hook = dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static;

/// Restores the previous panic hook when dropped.
#[must_use = "dropping the guard uninstalls the hook"]
pub struct PanicHookGuard {
    previous: Arc<Hook>,
}

/// Routes uncaught panics to `handler`, then to the previously installed hook.
///
/// Panics inside task bodies and dispatched callbacks are skipped: the runner and the event
/// loop catch those and report them on their own.
pub fn install_panic_hook(handler: Arc<dyn FaultHandler>) -> PanicHookGuard {
    let previous: Arc<Hook> = Arc::from(panic::take_hook());
    let chained = Arc::clone(&previous);

    panic::set_hook(Box::new(move |info| {
        if CAUGHT.with(Cell::get) {
            debug!("panic inside a caught region; left to its catcher");
            return;
        }
        let message = panic_message(info.payload());
        let message = match info.location() {
            Some(loc) => format!("{message} (at {}:{})", loc.file(), loc.line()),
            None => message,
        };
        handler.report(&Fault::new(FaultSource::Panic, message));
        chained(info);
    }));

    PanicHookGuard { previous }
}

impl Drop for PanicHookGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let previous = Arc::clone(&self.previous);
        drop(panic::take_hook());
        panic::set_hook(Box::new(move |info| previous(info)));
    }
}
