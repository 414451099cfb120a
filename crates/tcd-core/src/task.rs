use std::{
    fmt, mem,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::Instant,
};

use tcd_model::{Progress, TaskId, TaskName, TaskStatus};
use tracing::{debug, trace, warn};

use crate::{
    dispatch::Job,
    error::CoreError,
    event::{EventKind, RunnerEvent},
    fault::{Fault, FaultSource},
    runner::Shared,
    state::Control,
    work::{CancelCheck, Outcome},
};

type ProgressListener = Arc<dyn Fn(&Progress) + Send + Sync + 'static>;
type FinishListener<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

const fn encode(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Pending => 0,
        TaskStatus::Running => 1,
        TaskStatus::Completed => 2,
        TaskStatus::Failed => 3,
        TaskStatus::Cancelled => 4,
    }
}

const fn decode(raw: u8) -> TaskStatus {
    match raw {
        0 => TaskStatus::Pending,
        1 => TaskStatus::Running,
        2 => TaskStatus::Completed,
        3 => TaskStatus::Failed,
        _ => TaskStatus::Cancelled,
    }
}

/// Type-independent part of a task, shared by the worker, the handles and posted callbacks.
pub(crate) struct TaskCore {
    id: TaskId,
    name: TaskName,
    status: AtomicU8,
    cancel: CancelCheck,
    cancel_requested: AtomicBool,
    listeners: Mutex<Vec<ProgressListener>>,
    /// Serializes progress emission against the terminal transition.
    gate: Mutex<()>,
    shared: Arc<Shared>,
    submitted_at: Instant,
    started_at: OnceLock<Instant>,
}

impl TaskCore {
    pub(crate) fn new(id: TaskId, name: TaskName, shared: Arc<Shared>) -> Self {
        Self {
            id,
            name,
            status: AtomicU8::new(encode(TaskStatus::Pending)),
            cancel: CancelCheck::new(),
            cancel_requested: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            gate: Mutex::new(()),
            shared,
            submitted_at: Instant::now(),
            started_at: OnceLock::new(),
        }
    }

    pub(crate) fn id(&self) -> &TaskId {
        &self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn status(&self) -> TaskStatus {
        decode(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn cancel_check(&self) -> &CancelCheck {
        &self.cancel
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    fn event(&self, kind: EventKind) -> RunnerEvent {
        RunnerEvent::new(kind, self.id.clone(), self.name.clone())
    }

    fn fault(&self, source: FaultSource, message: impl Into<String>) {
        self.shared
            .faults
            .report(&Fault::new(source, message).with_task(self.id.clone()));
    }

    /// Atomic `from -> to` step; fails if the task is not in `from` or the step is not allowed.
    pub(crate) fn transition(&self, from: TaskStatus, to: TaskStatus) -> Result<(), CoreError> {
        if !from.can_transition_to(to) {
            return Err(CoreError::IllegalTransition {
                id: self.id.clone(),
                from,
                to,
            });
        }
        self.status
            .compare_exchange(encode(from), encode(to), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| CoreError::IllegalTransition {
                id: self.id.clone(),
                from: decode(actual),
                to,
            })
    }

    pub(crate) fn submitted(&self) {
        self.shared.metrics.record_task_submitted(&self.name);
        self.shared.bus.publish(self.event(EventKind::TaskSubmitted));
    }

    /// `Pending -> Running`, called once a worker slot was granted.
    pub(crate) fn start(&self) -> Result<(), CoreError> {
        self.transition(TaskStatus::Pending, TaskStatus::Running)?;

        let now = Instant::now();
        let _ = self.started_at.set(now);
        let queued = now.saturating_duration_since(self.submitted_at);

        self.shared
            .state
            .update_status(&self.id, TaskStatus::Running, None);
        self.shared.metrics.record_task_started(&self.name, queued);
        self.shared
            .bus
            .publish(self.event(EventKind::TaskStarting).with_elapsed(queued));
        debug!(task = %self.id, name = %self.name, queued_ms = queued.as_millis() as u64, "task starting");
        Ok(())
    }

    /// Sets the cancellation flag. Errors only for tasks already in a terminal state.
    pub(crate) fn request_cancel(&self) -> Result<(), CoreError> {
        if self.status().is_terminal() {
            return Err(CoreError::AlreadyTerminal(self.id.clone()));
        }
        if self.cancel_requested.swap(true, Ordering::AcqRel) {
            trace!(task = %self.id, "cancel already requested");
            return Ok(());
        }
        self.cancel.token().cancel();

        self.shared.state.mark_cancel_requested(&self.id);
        self.shared.metrics.record_cancel_requested(&self.name);
        self.shared.bus.publish(self.event(EventKind::CancelRequested));
        debug!(task = %self.id, name = %self.name, status = %self.status(), "cancel requested");
        Ok(())
    }

    /// Called from the body (any thread). Posts a delivery job unless the task stopped running.
    pub(crate) fn emit_progress(self: &Arc<Self>, progress: Progress) {
        let _gate = lock(&self.gate);
        if self.status() != TaskStatus::Running {
            trace!(task = %self.id, status = %self.status(), "progress dropped; task not running");
            return;
        }

        self.shared.state.record_progress(&self.id, progress.clone());
        self.shared
            .bus
            .publish(self.event(EventKind::TaskProgress).with_progress(progress.clone()));

        let core = Arc::clone(self);
        self.post(Box::new(move || core.deliver_progress(&progress)));
    }

    /// Runs on the interactive thread; listeners are invoked outside the lock.
    fn deliver_progress(&self, progress: &Progress) {
        let listeners: Vec<ProgressListener> = lock(&self.listeners).clone();
        for listener in listeners {
            listener(progress);
        }
    }

    pub(crate) fn add_progress_listener(&self, listener: ProgressListener) {
        lock(&self.listeners).push(listener);
    }

    /// Moves the task into its terminal state and records it everywhere but the host.
    ///
    /// Returns `false` (after reporting a fault) if the task was already terminal.
    pub(crate) fn settle(&self, status: TaskStatus, reason: Option<String>) -> bool {
        let run_time = self.started_at.get().map(Instant::elapsed);
        {
            let _gate = lock(&self.gate);
            if let Err(err) = self.transition(self.status(), status) {
                self.fault(FaultSource::Runner, err.to_string());
                return false;
            }
        }

        self.shared
            .state
            .update_status(&self.id, status, reason.clone());
        self.shared
            .metrics
            .record_task_finished(&self.name, status, run_time);

        if let Some(kind) = EventKind::for_terminal(status) {
            let mut ev = self.event(kind);
            if let Some(reason) = &reason {
                ev = ev.with_reason(reason.clone());
            }
            if let Some(run_time) = run_time {
                ev = ev.with_elapsed(run_time);
            }
            self.shared.bus.publish(ev);
        }

        match &reason {
            Some(reason) => warn!(task = %self.id, name = %self.name, %status, reason = %reason, "task finished"),
            None => debug!(
                task = %self.id,
                name = %self.name,
                %status,
                run_ms = run_time.map(|d| d.as_millis() as u64).unwrap_or(0),
                "task finished"
            ),
        }
        true
    }

    /// Finish delivery ran: the task leaves the registry.
    pub(crate) fn acknowledge(&self) {
        self.shared.state.remove_task(&self.id);
        self.shared.bus.publish(self.event(EventKind::TaskAcknowledged));
        trace!(task = %self.id, "task acknowledged");
    }

    pub(crate) fn post(&self, job: Job) {
        if let Err(err) = self.shared.dispatcher.post(job) {
            self.fault(FaultSource::Dispatcher, err.to_string());
        }
    }
}

impl Control for TaskCore {
    fn cancel(&self) -> Result<(), CoreError> {
        self.request_cancel()
    }
}

/// Acknowledges the task when dropped: after the finish job ran (even if the listener
/// panicked) or when the job is discarded unrun.
pub(crate) struct AckOnDrop(pub(crate) Arc<TaskCore>);

impl Drop for AckOnDrop {
    fn drop(&mut self) {
        self.0.acknowledge();
    }
}

pub(crate) enum FinishSlot<T> {
    Empty,
    Listener(FinishListener<T>),
    /// Outcome arrived before any listener.
    Ready(Outcome<T>),
    Delivered,
}

pub(crate) type SharedSlot<T> = Arc<Mutex<FinishSlot<T>>>;

/// Runs on the interactive thread as the task's finish job.
pub(crate) fn deliver_outcome<T>(slot: &Mutex<FinishSlot<T>>, outcome: Outcome<T>) {
    let listener = {
        let mut guard = lock(slot);
        match mem::replace(&mut *guard, FinishSlot::Delivered) {
            FinishSlot::Listener(listener) => listener,
            FinishSlot::Empty => {
                *guard = FinishSlot::Ready(outcome);
                return;
            }
            other @ (FinishSlot::Ready(_) | FinishSlot::Delivered) => {
                *guard = other;
                return;
            }
        }
    };
    listener(outcome);
}

/// Handle to a submitted task.
///
/// Cancellation is advisory: a body that never checks its [`WorkContext`] runs to completion.
/// Its result is discarded and the task still finishes as `Cancelled`.
///
/// [`WorkContext`]: crate::WorkContext
pub struct TaskHandle<T> {
    core: Arc<TaskCore>,
    finish: SharedSlot<T>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            finish: Arc::clone(&self.finish),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("status", &self.core.status())
            .finish()
    }
}

impl<T: Send + 'static> TaskHandle<T> {
    pub(crate) fn new(core: Arc<TaskCore>, finish: SharedSlot<T>) -> Self {
        Self { core, finish }
    }

    pub fn id(&self) -> &TaskId {
        self.core.id()
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn status(&self) -> TaskStatus {
        self.core.status()
    }

    /// The task reached a terminal state (its finish delivery may still be queued).
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.core.is_cancel_requested()
    }

    /// Requests cooperative cancellation.
    ///
    /// Idempotent while the task is active; [`CoreError::AlreadyTerminal`] once it finished.
    pub fn cancel(&self) -> Result<(), CoreError> {
        self.core.request_cancel()
    }

    /// Adds a progress listener. Listeners run on the interactive thread in registration order.
    pub fn on_progress(&self, listener: impl Fn(&Progress) + Send + Sync + 'static) -> &Self {
        self.core.add_progress_listener(Arc::new(listener));
        self
    }

    /// Sets the finish listener, replacing one registered earlier.
    ///
    /// If the outcome was already delivered with nobody listening, the listener receives it
    /// through the dispatcher.
    pub fn on_finished(&self, listener: impl FnOnce(Outcome<T>) + Send + 'static) -> &Self {
        let mut guard = lock(&self.finish);
        match mem::replace(&mut *guard, FinishSlot::Empty) {
            FinishSlot::Empty | FinishSlot::Listener(_) => {
                *guard = FinishSlot::Listener(Box::new(listener));
            }
            FinishSlot::Ready(outcome) => {
                *guard = FinishSlot::Delivered;
                drop(guard);
                self.core.post(Box::new(move || listener(outcome)));
            }
            FinishSlot::Delivered => {
                *guard = FinishSlot::Delivered;
                warn!(task = %self.core.id, "finish listener ignored; outcome already consumed");
            }
        }
        self
    }

    /// Takes the retained outcome if it was delivered with no listener present.
    pub fn take_outcome(&self) -> Option<Outcome<T>> {
        let mut guard = lock(&self.finish);
        match mem::replace(&mut *guard, FinishSlot::Delivered) {
            FinishSlot::Ready(outcome) => Some(outcome),
            other => {
                *guard = other;
                None
            }
        }
    }
}
