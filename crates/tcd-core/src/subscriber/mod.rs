//! Event fan-out to subscribers.
//!
//! Every subscriber owns a bounded queue drained by its own task on the runner's runtime, so a
//! slow subscriber never blocks a worker or the interactive thread.

use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{trace, warn};

use crate::{
    event::RunnerEvent,
    fault::{Caught, Fault, FaultHandler, FaultSource, panic_message},
};

/// Receives every [`RunnerEvent`] published by a runner.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &RunnerEvent);

    fn name(&self) -> &'static str;

    /// Queue size for this subscriber; `None` uses the runner default.
    fn queue_capacity(&self) -> Option<usize> {
        None
    }
}

struct Sink {
    name: &'static str,
    tx: mpsc::Sender<Arc<RunnerEvent>>,
    dead: AtomicBool,
}

pub(crate) struct Bus {
    sinks: RwLock<Vec<Sink>>,
    stopped: AtomicBool,
    faults: Arc<dyn FaultHandler>,
}

impl Bus {
    /// Spawns one drain task per subscriber on `handle`.
    pub(crate) fn start(
        handle: &Handle,
        subscribers: Vec<Arc<dyn Subscribe>>,
        default_capacity: usize,
        faults: Arc<dyn FaultHandler>,
    ) -> Self {
        let mut sinks = Vec::with_capacity(subscribers.len());

        for sub in subscribers {
            let capacity = sub.queue_capacity().unwrap_or(default_capacity).max(1);
            let (tx, rx) = mpsc::channel(capacity);
            let name = sub.name();
            handle.spawn(drain(sub, rx, Arc::clone(&faults)));
            sinks.push(Sink {
                name,
                tx,
                dead: AtomicBool::new(false),
            });
        }

        Self {
            sinks: RwLock::new(sinks),
            stopped: AtomicBool::new(false),
            faults,
        }
    }

    pub(crate) fn publish(&self, event: RunnerEvent) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        if sinks.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for sink in sinks.iter() {
            match sink.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    warn!(
                        subscriber = sink.name,
                        task = %ev.task,
                        kind = ?ev.kind,
                        "subscriber queue full; event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(ev)) => {
                    if !sink.dead.swap(true, Ordering::AcqRel) {
                        self.faults.report(
                            &Fault::new(
                                FaultSource::Subscriber,
                                format!("subscriber '{}' stopped receiving events", sink.name),
                            )
                            .with_task(ev.task.clone()),
                        );
                    }
                }
            }
        }
    }

    /// Stops accepting events; queued events are still delivered.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

async fn drain(
    sub: Arc<dyn Subscribe>,
    mut rx: mpsc::Receiver<Arc<RunnerEvent>>,
    faults: Arc<dyn FaultHandler>,
) {
    while let Some(event) = rx.recv().await {
        let sub_for_event = Arc::clone(&sub);
        let ev = Arc::clone(&event);
        let res = tokio::spawn(Caught::new(async move {
            sub_for_event.on_event(&ev).await;
        }))
        .await;

        if let Err(err) = res
            && err.is_panic()
        {
            let message = format!(
                "subscriber '{}' panicked: {}",
                sub.name(),
                panic_message(&*err.into_panic())
            );
            faults.report(&Fault::new(FaultSource::Subscriber, message).with_task(event.task.clone()));
        }
    }
    trace!(subscriber = sub.name(), "subscriber queue closed");
}
