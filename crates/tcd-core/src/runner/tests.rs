use std::{
    sync::{Mutex, mpsc as std_mpsc},
    thread,
    time::Duration,
};

use async_trait::async_trait;
use tcd_model::TaskStatus;

use super::*;
use crate::{
    dispatch::{EventLoop, Job},
    event::{EventKind, RunnerEvent},
    fault::Fault,
    work::ProgressReporter,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Recorder(Mutex<Vec<Fault>>);

impl FaultHandler for Recorder {
    fn report(&self, fault: &Fault) {
        self.0.lock().unwrap().push(fault.clone());
    }
}

fn setup(cfg: RunnerConfig) -> (TaskRunner, EventLoop) {
    let event_loop = EventLoop::new();
    let runner = TaskRunner::builder(cfg)
        .with_dispatcher(event_loop.dispatcher())
        .build()
        .unwrap();
    (runner, event_loop)
}

type Slot<T> = Arc<Mutex<Option<Outcome<T>>>>;

fn capture<T: Send + 'static>(handle: &TaskHandle<T>) -> Slot<T> {
    let slot: Slot<T> = Arc::new(Mutex::new(None));
    let out = Arc::clone(&slot);
    handle.on_finished(move |outcome| *out.lock().unwrap() = Some(outcome));
    slot
}

fn wait_outcome<T>(event_loop: &EventLoop, slot: &Slot<T>) -> Outcome<T> {
    assert!(
        event_loop.run_until(WAIT, || slot.lock().unwrap().is_some()),
        "task did not finish in time"
    );
    slot.lock().unwrap().take().unwrap()
}

#[test]
fn progress_then_completed_in_order() {
    let (runner, event_loop) = setup(RunnerConfig::default());
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    let handle = runner.submit(|ctx| {
        ctx.report(Progress::of(1, 10));
        ctx.report(Progress::of(5, 10));
        ctx.report(Progress::of(10, 10));
        Ok(42)
    });

    let progress_log = Arc::clone(&log);
    runner.on_progress(&handle, move |p| {
        progress_log.lock().unwrap().push(format!(
            "{}/{}",
            p.completed_units(),
            p.total_units().unwrap_or(0)
        ));
    });
    let slot: Slot<i32> = Arc::new(Mutex::new(None));
    let (finish_log, out) = (Arc::clone(&log), Arc::clone(&slot));
    runner.on_finished(&handle, move |outcome| {
        finish_log.lock().unwrap().push("finished".to_string());
        *out.lock().unwrap() = Some(outcome);
    });

    let outcome = wait_outcome(&event_loop, &slot);
    assert!(matches!(outcome, Outcome::Completed(42)));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["1/10", "5/10", "10/10", "finished"]
    );
    assert_eq!(handle.status(), TaskStatus::Completed);
}

#[test]
fn failure_is_delivered_not_propagated() {
    let (runner, event_loop) = setup(RunnerConfig::default());

    let handle = runner.submit(|_ctx| -> WorkResult<()> { Err(WorkError::msg("bad input")) });
    let slot = capture(&handle);

    let outcome = wait_outcome(&event_loop, &slot);
    assert!(outcome.is_failed());
    assert_eq!(outcome.reason().as_deref(), Some("bad input"));
    assert_eq!(handle.status(), TaskStatus::Failed);
}

#[test]
fn long_task_cancelled_immediately() {
    let (runner, event_loop) = setup(RunnerConfig::default());

    let handle = runner.submit(|ctx| -> WorkResult<()> {
        loop {
            ctx.check_cancelled()?;
            thread::sleep(Duration::from_millis(5));
        }
    });
    runner.cancel(&handle).unwrap();
    assert!(handle.is_cancel_requested());
    let slot = capture(&handle);

    assert!(wait_outcome(&event_loop, &slot).is_cancelled());
    assert_eq!(handle.status(), TaskStatus::Cancelled);
}

#[test]
fn repeated_cancel_is_idempotent() {
    let (runner, event_loop) = setup(RunnerConfig::default());

    let handle = runner.submit(|ctx| -> WorkResult<()> {
        loop {
            ctx.check_cancelled()?;
            thread::sleep(Duration::from_millis(5));
        }
    });
    handle.cancel().unwrap();
    handle.cancel().unwrap();
    let slot = capture(&handle);

    assert!(wait_outcome(&event_loop, &slot).is_cancelled());
}

#[test]
fn cancel_on_terminal_task_is_noop() {
    let (runner, event_loop) = setup(RunnerConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = runner.submit(|_ctx| Ok(1_u8));
    let counter = Arc::clone(&calls);
    handle.on_finished(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(event_loop.run_until(WAIT, || calls.load(Ordering::SeqCst) == 1));

    assert!(matches!(
        runner.cancel(&handle),
        Err(CoreError::AlreadyTerminal(_))
    ));
    event_loop.pump_for(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.status(), TaskStatus::Completed);
}

#[test]
fn panic_becomes_failed() {
    let (runner, event_loop) = setup(RunnerConfig::default());

    let handle = runner.submit(|_ctx| -> WorkResult<()> { panic!("boom") });
    let slot = capture(&handle);

    let outcome = wait_outcome(&event_loop, &slot);
    let reason = outcome.reason().unwrap();
    assert!(reason.contains("work panicked"), "{reason}");
    assert!(reason.contains("boom"), "{reason}");
}

#[test]
fn observed_cancellation_wins_over_ok() {
    let (runner, event_loop) = setup(RunnerConfig::default());

    let handle = runner.submit(|ctx| {
        while !ctx.is_cancelled() {
            thread::sleep(Duration::from_millis(5));
        }
        Ok("finished anyway")
    });
    handle.cancel().unwrap();
    let slot = capture(&handle);

    assert!(wait_outcome(&event_loop, &slot).is_cancelled());
}

#[test]
fn ignored_cancellation_still_settles_cancelled() {
    let (runner, event_loop) = setup(RunnerConfig::default());
    let (started_tx, started_rx) = std_mpsc::channel();

    let handle = runner.submit(move |_ctx| {
        started_tx.send(()).ok();
        thread::sleep(Duration::from_millis(100));
        Ok(5)
    });
    started_rx.recv_timeout(WAIT).unwrap();
    handle.cancel().unwrap();
    let slot = capture(&handle);

    let outcome = wait_outcome(&event_loop, &slot);
    assert!(outcome.is_cancelled(), "{outcome:?}");
    assert!(handle.is_cancel_requested());
    assert_eq!(handle.status(), TaskStatus::Cancelled);
}

#[test]
fn serial_runner_preserves_submission_order() {
    let (runner, event_loop) = setup(RunnerConfig::serial());
    let ran = Arc::new(Mutex::new(Vec::new()));
    let finished = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let ran = Arc::clone(&ran);
            let handle = runner.submit(move |_ctx| {
                ran.lock().unwrap().push(i);
                thread::sleep(Duration::from_millis(5));
                Ok(i)
            });
            let finished = Arc::clone(&finished);
            handle.on_finished(move |outcome| {
                finished.lock().unwrap().extend(outcome.ok());
            });
            handle
        })
        .collect();

    assert!(event_loop.run_until(WAIT, || finished.lock().unwrap().len() == 5));
    assert_eq!(*ran.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(*finished.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert!(handles.iter().all(TaskHandle::is_finished));
}

#[test]
fn pending_task_cancelled_without_running() {
    let (runner, event_loop) = setup(RunnerConfig::serial());
    let (release_tx, release_rx) = std_mpsc::channel::<()>();
    let second_ran = Arc::new(AtomicUsize::new(0));

    let first = runner.submit(move |_ctx| {
        release_rx.recv_timeout(WAIT).ok();
        Ok(())
    });
    let counter = Arc::clone(&second_ran);
    let second = runner.submit(move |_ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let first_slot = capture(&first);
    let second_slot = capture(&second);

    second.cancel().unwrap();
    assert!(wait_outcome(&event_loop, &second_slot).is_cancelled());
    assert_eq!(second.status(), TaskStatus::Cancelled);

    release_tx.send(()).unwrap();
    assert!(wait_outcome(&event_loop, &first_slot).is_completed());
    assert_eq!(second_ran.load(Ordering::SeqCst), 0);
}

#[test]
fn late_finish_listener_receives_retained_outcome() {
    let (runner, event_loop) = setup(RunnerConfig::default());

    let handle = runner.submit(|_ctx| Ok(7));
    let id = handle.id().clone();
    assert!(event_loop.run_until(WAIT, || runner.get(&id).is_none()));

    let slot = capture(&handle);
    assert!(matches!(wait_outcome(&event_loop, &slot), Outcome::Completed(7)));
    assert!(handle.take_outcome().is_none());
}

#[test]
fn take_outcome_without_listener() {
    let (runner, event_loop) = setup(RunnerConfig::default());

    let handle = runner.submit(|_ctx| Ok("value"));
    let id = handle.id().clone();
    assert!(event_loop.run_until(WAIT, || runner.get(&id).is_none()));

    assert!(matches!(handle.take_outcome(), Some(Outcome::Completed("value"))));
    assert!(handle.take_outcome().is_none());
}

#[test]
fn registry_tracks_task_until_acknowledged() {
    let (runner, event_loop) = setup(RunnerConfig::default());
    let (release_tx, release_rx) = std_mpsc::channel::<()>();

    let handle = runner.submit_named("load-remotes", move |ctx| {
        ctx.percent(30);
        release_rx.recv_timeout(WAIT).ok();
        Ok(())
    });
    let id = handle.id().clone();

    let info = runner.get(&id).expect("registered on submit");
    assert_eq!(info.name, "load-remotes");
    assert!(info.status.is_active());
    assert_eq!(runner.tasks(&TaskQuery::new().with_name("load-remotes")).total, 1);

    let slot = capture(&handle);
    release_tx.send(()).unwrap();
    assert!(wait_outcome(&event_loop, &slot).is_completed());

    assert!(runner.get(&id).is_none());
    assert!(runner.state().is_empty());
    assert!(matches!(
        runner.cancel_by_id(&id),
        Err(CoreError::NotFound(_))
    ));
}

#[test]
fn progress_after_finish_is_dropped() {
    let (runner, event_loop) = setup(RunnerConfig::default());
    let kept: Arc<Mutex<Option<ProgressReporter>>> = Arc::new(Mutex::new(None));
    let seen = Arc::new(AtomicUsize::new(0));

    let keep = Arc::clone(&kept);
    let handle = runner.submit(move |ctx| {
        *keep.lock().unwrap() = Some(ctx.reporter().clone());
        Ok(())
    });
    let counter = Arc::clone(&seen);
    handle.on_progress(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let slot = capture(&handle);
    assert!(wait_outcome(&event_loop, &slot).is_completed());

    let reporter = kept.lock().unwrap().take().unwrap();
    reporter.report(Progress::of(1, 2));
    event_loop.pump_for(Duration::from_millis(50));
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[test]
fn async_body_runs_and_reports() {
    let (runner, event_loop) = setup(RunnerConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let handle = runner.submit_async("async", |ctx| async move {
        for step in 1..=3 {
            tokio::time::sleep(Duration::from_millis(2)).await;
            ctx.report(Progress::of(step, 3));
        }
        Ok::<_, WorkError>(ctx.name().to_string())
    });
    let log = Arc::clone(&seen);
    handle.on_progress(move |p| log.lock().unwrap().push(p.completed_units()));
    let slot = capture(&handle);

    match wait_outcome(&event_loop, &slot) {
        Outcome::Completed(name) => assert_eq!(name, "async"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn async_body_cancelled_while_waiting() {
    let (runner, event_loop) = setup(RunnerConfig::default());

    let handle = runner.submit_async("waiter", |ctx| async move {
        ctx.cancelled().await;
        Ok::<_, WorkError>(())
    });
    handle.cancel().unwrap();
    let slot = capture(&handle);

    assert!(wait_outcome(&event_loop, &slot).is_cancelled());
}

struct Collect(Arc<Mutex<Vec<EventKind>>>);

#[async_trait]
impl Subscribe for Collect {
    async fn on_event(&self, event: &RunnerEvent) {
        self.0.lock().unwrap().push(event.kind);
    }
    fn name(&self) -> &'static str {
        "collect"
    }
}

#[test]
fn subscribers_see_lifecycle_events() {
    let event_loop = EventLoop::new();
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let runner = TaskRunner::builder(RunnerConfig::default())
        .with_dispatcher(event_loop.dispatcher())
        .with_subscribers(vec![Arc::new(Collect(Arc::clone(&kinds)))])
        .build()
        .unwrap();

    let handle = runner.submit(|ctx| {
        ctx.report(Progress::new(1));
        Ok(())
    });
    let slot = capture(&handle);
    assert!(wait_outcome(&event_loop, &slot).is_completed());
    assert!(event_loop.run_until(WAIT, || {
        kinds
            .lock()
            .unwrap()
            .contains(&EventKind::TaskAcknowledged)
    }));

    assert_eq!(
        *kinds.lock().unwrap(),
        vec![
            EventKind::TaskSubmitted,
            EventKind::TaskStarting,
            EventKind::TaskProgress,
            EventKind::TaskCompleted,
            EventKind::TaskAcknowledged,
        ]
    );
}

#[derive(Default)]
struct CountingMetrics {
    submitted: AtomicUsize,
    started: AtomicUsize,
    finished: Mutex<Vec<(String, TaskStatus, bool)>>,
    cancels: AtomicUsize,
}

impl MetricsBackend for CountingMetrics {
    fn record_task_submitted(&self, _name: &str) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }
    fn record_task_started(&self, _name: &str, _queued: Duration) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn record_task_finished(&self, name: &str, status: TaskStatus, run_time: Option<Duration>) {
        self.finished
            .lock()
            .unwrap()
            .push((name.to_string(), status, run_time.is_some()));
    }
    fn record_cancel_requested(&self, _name: &str) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn metrics_follow_lifecycle() {
    let event_loop = EventLoop::new();
    let metrics = Arc::new(CountingMetrics::default());
    let runner = TaskRunner::builder(RunnerConfig::default())
        .with_dispatcher(event_loop.dispatcher())
        .with_metrics(metrics.clone())
        .build()
        .unwrap();

    let handle = runner.submit_named("scan", |_ctx| Ok(()));
    let slot = capture(&handle);
    assert!(wait_outcome(&event_loop, &slot).is_completed());

    assert_eq!(metrics.submitted.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.started.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.cancels.load(Ordering::SeqCst), 0);
    assert_eq!(
        *metrics.finished.lock().unwrap(),
        vec![("scan".to_string(), TaskStatus::Completed, true)]
    );
}

struct ClosedDispatcher;

impl Dispatch for ClosedDispatcher {
    fn post(&self, _job: Job) -> Result<(), CoreError> {
        Err(CoreError::DispatcherClosed)
    }
}

#[test]
fn closed_dispatcher_is_reported_and_task_acknowledged() {
    let faults = Arc::new(Recorder::default());
    let runner = TaskRunner::builder(RunnerConfig::default())
        .with_dispatcher(ClosedDispatcher)
        .with_fault_handler(faults.clone())
        .build()
        .unwrap();

    let handle = runner.submit(|ctx| {
        ctx.report(Progress::new(1));
        Ok(())
    });
    let id = handle.id().clone();

    let deadline = std::time::Instant::now() + WAIT;
    while runner.get(&id).is_some() && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(runner.get(&id).is_none());

    let faults = faults.0.lock().unwrap();
    assert!(faults.len() >= 2);
    assert!(faults.iter().all(|f| f.source == FaultSource::Dispatcher));
    assert!(faults.iter().all(|f| f.task.as_ref() == Some(&id)));
}

#[test]
fn shutdown_cancels_running_and_pending() {
    let (runner, event_loop) = setup(RunnerConfig::serial().with_shutdown_grace(WAIT));
    let (started_tx, started_rx) = std_mpsc::channel();

    let running = runner.submit(move |ctx| -> WorkResult<()> {
        started_tx.send(()).ok();
        loop {
            ctx.check_cancelled()?;
            thread::sleep(Duration::from_millis(5));
        }
    });
    let pending = runner.submit(|_ctx| Ok(()));
    let running_slot = capture(&running);
    let pending_slot = capture(&pending);

    started_rx.recv_timeout(WAIT).unwrap();
    runner.shutdown();

    assert_eq!(running.status(), TaskStatus::Cancelled);
    assert_eq!(pending.status(), TaskStatus::Cancelled);

    event_loop.pump();
    assert!(running_slot.lock().unwrap().take().unwrap().is_cancelled());
    assert!(pending_slot.lock().unwrap().take().unwrap().is_cancelled());
}

#[test]
fn builder_requires_dispatcher() {
    let res = TaskRunner::builder(RunnerConfig::default()).build();
    assert!(matches!(res, Err(CoreError::InvalidConfig(_))));

    let res = TaskRunner::builder(RunnerConfig::default().with_max_concurrent(0))
        .with_dispatcher(EventLoop::new().dispatcher())
        .build();
    assert!(matches!(res, Err(CoreError::InvalidConfig(_))));
}

#[test]
fn interpret_maps_every_case() {
    let ok: Result<WorkResult<u8>, JoinError> = Ok(Ok(1));
    assert!(matches!(interpret(ok, false), Outcome::Completed(1)));

    let ok: Result<WorkResult<u8>, JoinError> = Ok(Ok(1));
    assert!(interpret(ok, true).is_cancelled());

    let failed: Result<WorkResult<u8>, JoinError> = Ok(Err(WorkError::msg("x")));
    assert!(interpret(failed, false).is_failed());

    let failed: Result<WorkResult<u8>, JoinError> = Ok(Err(WorkError::msg("x")));
    assert!(interpret(failed, true).is_cancelled());

    let cancelled: Result<WorkResult<u8>, JoinError> = Ok(Err(WorkError::Cancelled));
    assert!(interpret(cancelled, false).is_cancelled());
}
