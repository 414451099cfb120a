//! The cancellable task runner.
//!
//! Task bodies run on a tokio runtime (blocking bodies on its blocking pool); everything the host
//! sees (progress, the outcome) is posted through its [`Dispatch`] and runs on the interactive
//! thread. At most `max_concurrent` bodies run at once; waiting tasks stay `Pending` and are
//! admitted in submission order.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tcd_model::{DEFAULT_TASK_NAME, Progress, TaskId, TaskInfo, TaskName, TaskPage, TaskQuery};
use tokio::{
    runtime::{Builder, Handle, Runtime},
    sync::{Notify, OwnedSemaphorePermit, Semaphore, mpsc, oneshot},
    task::{JoinError, JoinHandle},
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::RunnerConfig,
    dispatch::Dispatch,
    error::CoreError,
    fault::{Caught, Fault, FaultHandler, FaultSource, LogFaults, caught, panic_message},
    metrics::{MetricsBackend, NoOpMetrics},
    state::{Control, TaskState},
    subscriber::{Bus, Subscribe},
    task::{AckOnDrop, FinishSlot, SharedSlot, TaskCore, TaskHandle, deliver_outcome},
    work::{Outcome, WorkContext, WorkError, WorkResult},
};

#[cfg(test)]
mod tests;

/// How long an owned runtime may take to drop its remaining tasks after the grace period.
const RUNTIME_DRAIN: Duration = Duration::from_millis(100);

/// Starts a task body and returns its join handle. Called on the runtime once a slot is granted.
type Launch<T> = Box<dyn FnOnce(WorkContext) -> JoinHandle<WorkResult<T>> + Send + 'static>;

/// State shared by the runner, every task and the admission loop.
pub(crate) struct Shared {
    pub(crate) dispatcher: Arc<dyn Dispatch>,
    pub(crate) state: TaskState,
    pub(crate) bus: Bus,
    pub(crate) metrics: Arc<dyn MetricsBackend>,
    pub(crate) faults: Arc<dyn FaultHandler>,
    slots: Arc<Semaphore>,
    admit: mpsc::UnboundedSender<Admission>,
    /// Tasks whose body has not settled yet.
    active: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn task_done(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_one();
        }
    }

    async fn wait_idle(&self) {
        loop {
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            self.idle.notified().await;
        }
    }
}

/// A task waiting for a worker slot.
struct Admission {
    start: oneshot::Sender<OwnedSemaphorePermit>,
}

/// Hands out slots strictly in submission order.
async fn admission_loop(slots: Arc<Semaphore>, mut rx: mpsc::UnboundedReceiver<Admission>) {
    while let Some(Admission { mut start }) = rx.recv().await {
        let permit = tokio::select! {
            biased;
            // The task was cancelled while queued.
            _ = start.closed() => continue,
            permit = Arc::clone(&slots).acquire_owned() => permit,
        };
        let Ok(permit) = permit else {
            break;
        };
        // A failed send returns the permit, which is released on drop.
        let _ = start.send(permit);
    }

    rx.close();
    while rx.try_recv().is_ok() {}
    debug!("admission loop stopped");
}

/// Configures and builds a [`TaskRunner`].
pub struct RunnerBuilder {
    cfg: RunnerConfig,
    dispatcher: Option<Arc<dyn Dispatch>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    metrics: Arc<dyn MetricsBackend>,
    faults: Arc<dyn FaultHandler>,
    runtime: Option<Handle>,
}

impl RunnerBuilder {
    /// Where callbacks are run. Required.
    pub fn with_dispatcher(mut self, dispatcher: impl Dispatch) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsBackend>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_fault_handler(mut self, faults: Arc<dyn FaultHandler>) -> Self {
        self.faults = faults;
        self
    }

    /// Runs tasks on an existing runtime instead of building one.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<TaskRunner, CoreError> {
        self.cfg.validate()?;
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| CoreError::InvalidConfig("no dispatcher configured".into()))?;

        let (runtime, handle) = match self.runtime {
            Some(handle) => (None, handle),
            None => {
                let rt = Builder::new_multi_thread()
                    .worker_threads(self.cfg.worker_threads)
                    .thread_name(self.cfg.thread_name.as_str())
                    .enable_all()
                    .build()
                    .map_err(CoreError::Runtime)?;
                let handle = rt.handle().clone();
                (Some(rt), handle)
            }
        };

        let bus = Bus::start(
            &handle,
            self.subscribers,
            self.cfg.event_queue_capacity,
            Arc::clone(&self.faults),
        );
        let slots = Arc::new(Semaphore::new(self.cfg.max_concurrent));
        let (admit, rx) = mpsc::unbounded_channel();
        handle.spawn(admission_loop(Arc::clone(&slots), rx));

        let shared = Arc::new(Shared {
            dispatcher,
            state: TaskState::new(),
            bus,
            metrics: self.metrics,
            faults: self.faults,
            slots,
            admit,
            active: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        info!(
            max_concurrent = self.cfg.max_concurrent,
            owned_runtime = runtime.is_some(),
            "task runner ready"
        );
        Ok(TaskRunner {
            cfg: self.cfg,
            shared,
            handle,
            runtime,
        })
    }
}

/// Runs work off the interactive thread and reports back to it.
///
/// Dropping the runner (or calling [`shutdown`](Self::shutdown)) cancels every task. A runner
/// that owns its runtime then waits up to `shutdown_grace` for running bodies, so it must be
/// dropped outside of async code.
pub struct TaskRunner {
    cfg: RunnerConfig,
    shared: Arc<Shared>,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl TaskRunner {
    pub fn builder(cfg: RunnerConfig) -> RunnerBuilder {
        RunnerBuilder {
            cfg,
            dispatcher: None,
            subscribers: Vec::new(),
            metrics: Arc::new(NoOpMetrics),
            faults: Arc::new(LogFaults),
            runtime: None,
        }
    }

    /// Submits a blocking body under the default name.
    pub fn submit<T, F>(&self, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(WorkContext) -> WorkResult<T> + Send + 'static,
    {
        self.submit_named(DEFAULT_TASK_NAME, work)
    }

    /// Submits a blocking body. Returns immediately; the body runs on the blocking pool.
    pub fn submit_named<T, F>(&self, name: impl Into<TaskName>, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(WorkContext) -> WorkResult<T> + Send + 'static,
    {
        self.launch(
            name.into(),
            Box::new(move |ctx| tokio::task::spawn_blocking(move || caught(|| work(ctx)))),
        )
    }

    /// Submits an async body, for work that mostly waits (subprocesses, sockets).
    pub fn submit_async<T, F, Fut>(&self, name: impl Into<TaskName>, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(WorkContext) -> Fut + Send + 'static,
        Fut: Future<Output = WorkResult<T>> + Send + 'static,
    {
        self.launch(
            name.into(),
            Box::new(move |ctx| tokio::spawn(Caught::new(async move { work(ctx).await }))),
        )
    }

    #[instrument(level = "debug", skip_all, fields(name = %name))]
    fn launch<T: Send + 'static>(&self, name: TaskName, body: Launch<T>) -> TaskHandle<T> {
        let id = TaskId::new(Uuid::new_v4().to_string());
        let core = Arc::new(TaskCore::new(
            id.clone(),
            name.clone(),
            Arc::clone(&self.shared),
        ));
        let control: Arc<dyn Control> = core.clone();
        self.shared
            .state
            .add_task(id.clone(), name, Arc::downgrade(&control));

        let finish: SharedSlot<T> = Arc::new(Mutex::new(FinishSlot::Empty));
        let (start, granted) = oneshot::channel();

        self.shared.active.fetch_add(1, Ordering::AcqRel);
        core.submitted();
        if self.shared.admit.send(Admission { start }).is_err() {
            debug!(task = %id, "admission closed; task will be cancelled");
        }
        self.handle.spawn(drive(
            Arc::clone(&self.shared),
            Arc::clone(&core),
            Arc::clone(&finish),
            granted,
            body,
        ));

        debug!(task = %id, "task submitted");
        TaskHandle::new(core, finish)
    }

    /// Requests cooperative cancellation; see [`TaskHandle::cancel`].
    pub fn cancel<T: Send + 'static>(&self, handle: &TaskHandle<T>) -> Result<(), CoreError> {
        handle.cancel()
    }

    pub fn on_progress<T: Send + 'static>(
        &self,
        handle: &TaskHandle<T>,
        listener: impl Fn(&Progress) + Send + Sync + 'static,
    ) {
        handle.on_progress(listener);
    }

    pub fn on_finished<T: Send + 'static>(
        &self,
        handle: &TaskHandle<T>,
        listener: impl FnOnce(Outcome<T>) + Send + 'static,
    ) {
        handle.on_finished(listener);
    }

    /// Cancels a task by id. [`CoreError::NotFound`] once the task was acknowledged.
    pub fn cancel_by_id(&self, id: &TaskId) -> Result<(), CoreError> {
        self.shared.state.cancel(id)
    }

    /// Requests cancellation of every live task. Returns how many accepted the request.
    pub fn cancel_all(&self) -> usize {
        self.shared.state.cancel_all()
    }

    pub fn get(&self, id: &TaskId) -> Option<TaskInfo> {
        self.shared.state.get(id)
    }

    pub fn tasks(&self, query: &TaskQuery) -> TaskPage<TaskInfo> {
        self.shared.state.query(query)
    }

    /// Tasks submitted whose body has not settled yet.
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Registry of live tasks; cheap to clone and usable from any thread.
    pub fn state(&self) -> TaskState {
        self.shared.state.clone()
    }

    /// Runtime the task bodies run on.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.cfg
    }

    /// Cancels everything. With an owned runtime, also waits up to `shutdown_grace` for running
    /// bodies; on a borrowed runtime they keep running detached.
    ///
    /// Finish deliveries of the cancelled tasks are left in the dispatcher queue.
    pub fn shutdown(self) {
        drop(self);
    }

    fn close(&mut self) {
        let cancelled = self.shared.state.cancel_all();
        self.shared.slots.close();
        info!(cancelled, "task runner shutting down");

        match self.runtime.take() {
            Some(rt) => {
                let shared = Arc::clone(&self.shared);
                let grace = self.cfg.shutdown_grace;
                let idle = rt.block_on(async move {
                    tokio::time::timeout(grace, shared.wait_idle())
                        .await
                        .is_ok()
                });
                if !idle {
                    warn!(
                        still_running = self.active(),
                        grace_ms = grace.as_millis() as u64,
                        "shutdown grace exceeded; abandoning running tasks"
                    );
                }
                self.shared.bus.stop();
                rt.shutdown_timeout(RUNTIME_DRAIN);
            }
            None => self.shared.bus.stop(),
        }
        info!("task runner stopped");
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Waits for a slot (or cancellation), runs the body and settles the task.
async fn drive<T: Send + 'static>(
    shared: Arc<Shared>,
    core: Arc<TaskCore>,
    finish: SharedSlot<T>,
    granted: oneshot::Receiver<OwnedSemaphorePermit>,
    body: Launch<T>,
) {
    let token = core.cancel_check().token().clone();
    let permit = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        permit = granted => permit.ok(),
    };

    // The slot is held until the finish job is posted, so a serial runner also delivers
    // outcomes in submission order.
    let outcome = if permit.is_none() {
        Outcome::Cancelled
    } else {
        match core.start() {
            Ok(()) => {
                let joined = body(WorkContext::new(Arc::clone(&core))).await;
                interpret(joined, core.is_cancel_requested())
            }
            Err(err) => {
                shared.faults.report(
                    &Fault::new(FaultSource::Runner, err.to_string())
                        .with_task(core.id().clone()),
                );
                Outcome::Cancelled
            }
        }
    };

    if core.settle(outcome.status(), outcome.reason()) {
        let ack = AckOnDrop(Arc::clone(&core));
        core.post(Box::new(move || {
            let _ack = ack;
            deliver_outcome(&finish, outcome);
        }));
    }
    drop(permit);
    shared.task_done();
}

/// A cancel request settles the task as cancelled whatever the body returned; panics still fail.
fn interpret<T>(
    joined: Result<WorkResult<T>, JoinError>,
    cancel_requested: bool,
) -> Outcome<T> {
    match joined {
        Err(err) if err.is_panic() => Outcome::Failed(anyhow::anyhow!(
            "work panicked: {}",
            panic_message(&*err.into_panic())
        )),
        Err(_) => Outcome::Cancelled,
        Ok(_) if cancel_requested => Outcome::Cancelled,
        Ok(Ok(value)) => Outcome::Completed(value),
        Ok(Err(WorkError::Cancelled)) => Outcome::Cancelled,
        Ok(Err(WorkError::Failed(err))) => Outcome::Failed(err),
    }
}
