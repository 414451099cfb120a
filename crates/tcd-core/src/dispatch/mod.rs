//! Marshalling of callbacks onto the interactive thread.
//!
//! The runner never invokes user callbacks on a worker. It hands them to a [`Dispatch`]
//! implementation supplied by the host, which must run them FIFO on the thread that owns the
//! UI (or whatever plays that role). [`EventLoop`] is a ready-made implementation for hosts
//! without an event loop of their own.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, mpsc},
    time::{Duration, Instant},
};

use tracing::trace;

use crate::{
    error::CoreError,
    fault::{Fault, FaultHandler, FaultSource, LogFaults, caught, panic_message},
};

/// Upper bound on a single blocking wait inside [`EventLoop::run_until`].
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Unit of work posted to the interactive thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Host event loop collaborator.
///
/// Jobs posted from one thread must run in posting order.
pub trait Dispatch: Send + Sync + 'static {
    fn post(&self, job: Job) -> Result<(), CoreError>;
}

/// Posting side of an [`EventLoop`]; cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct LoopDispatcher {
    tx: mpsc::Sender<Job>,
}

impl Dispatch for LoopDispatcher {
    fn post(&self, job: Job) -> Result<(), CoreError> {
        self.tx.send(job).map_err(|_| CoreError::DispatcherClosed)
    }
}

/// Minimal callback queue owned by the interactive thread.
///
/// The owning thread calls [`pump`](Self::pump) (or one of the waiting variants) whenever it
/// is ready to run callbacks. A panicking callback is caught, reported to the fault handler,
/// and does not stop the loop.
pub struct EventLoop {
    tx: mpsc::Sender<Job>,
    rx: mpsc::Receiver<Job>,
    faults: Arc<dyn FaultHandler>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            faults: Arc::new(LogFaults),
        }
    }

    pub fn with_fault_handler(mut self, faults: Arc<dyn FaultHandler>) -> Self {
        self.faults = faults;
        self
    }

    pub fn dispatcher(&self) -> LoopDispatcher {
        LoopDispatcher {
            tx: self.tx.clone(),
        }
    }

    /// Runs every job queued right now. Returns how many ran.
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            self.run(job);
            ran += 1;
        }
        ran
    }

    /// Waits up to `timeout` for a job, then drains the queue.
    pub fn pump_for(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                self.run(job);
                1 + self.pump()
            }
            Err(_) => 0,
        }
    }

    /// Pumps until `done` holds or `timeout` elapses. Returns whether `done` was reached.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_for((deadline - now).min(POLL_SLICE));
        }
    }

    fn run(&self, job: Job) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| caught(job))) {
            let message = format!("callback panicked: {}", panic_message(&*payload));
            self.faults
                .report(&Fault::new(FaultSource::Listener, message));
        } else {
            trace!("dispatched job completed");
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}
