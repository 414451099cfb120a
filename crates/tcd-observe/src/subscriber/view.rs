use std::borrow::Borrow;

use tcd_core::{EventKind, RunnerEvent};
use tracing::{debug, error, info, trace};

/// Field accessors used when logging a [`RunnerEvent`].
pub trait View {
    fn as_task(&self) -> &str;
    fn as_name(&self) -> &str;
    fn as_reason(&self) -> &str;
    fn elapsed_ms(&self) -> u64;
    fn completed(&self) -> u64;
    fn total(&self) -> u64;
    fn progress_message(&self) -> &str;
    fn kind(&self) -> EventKind;
}

impl<T> View for T
where
    T: Borrow<RunnerEvent>,
{
    #[inline]
    fn as_task(&self) -> &str {
        self.borrow().task.as_str()
    }
    #[inline]
    fn as_name(&self) -> &str {
        &self.borrow().name
    }
    #[inline]
    fn as_reason(&self) -> &str {
        self.borrow().reason.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn elapsed_ms(&self) -> u64 {
        self.borrow()
            .elapsed
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
    #[inline]
    fn completed(&self) -> u64 {
        self.borrow()
            .progress
            .as_ref()
            .map(|p| p.completed_units())
            .unwrap_or(0)
    }
    #[inline]
    fn total(&self) -> u64 {
        self.borrow()
            .progress
            .as_ref()
            .and_then(|p| p.total_units())
            .unwrap_or(0)
    }
    #[inline]
    fn progress_message(&self) -> &str {
        self.borrow()
            .progress
            .as_ref()
            .and_then(|p| p.message())
            .unwrap_or("")
    }
    #[inline]
    fn kind(&self) -> EventKind {
        self.borrow().kind
    }
}

#[inline]
pub fn message_for(kind: EventKind) -> &'static str {
    match kind {
        // admission
        EventKind::TaskSubmitted => "task submitted (pending a worker slot)",
        EventKind::TaskStarting => "task is starting",

        // progress
        EventKind::TaskProgress => "task reported progress",
        EventKind::CancelRequested => "cancellation requested",

        // terminal
        EventKind::TaskCompleted => "task completed",
        EventKind::TaskFailed => "task failed",
        EventKind::TaskCancelled => "task cancelled",

        // delivery
        EventKind::TaskAcknowledged => "task outcome delivered; removed from registry",
    }
}

#[inline]
pub fn log_event<E: View>(e: E) {
    let msg = message_for(e.kind());

    match e.kind() {
        // admission
        EventKind::TaskSubmitted => debug!(task = e.as_task(), name = e.as_name(), "{msg}"),
        EventKind::TaskStarting => info!(
            task = e.as_task(),
            name = e.as_name(),
            queued_ms = e.elapsed_ms(),
            "{msg}"
        ),

        // progress
        EventKind::TaskProgress => trace!(
            task = e.as_task(),
            completed = e.completed(),
            total = e.total(),
            message = e.progress_message(),
            "{msg}"
        ),
        EventKind::CancelRequested => info!(task = e.as_task(), name = e.as_name(), "{msg}"),

        // terminal
        EventKind::TaskCompleted => info!(
            task = e.as_task(),
            name = e.as_name(),
            run_ms = e.elapsed_ms(),
            "{msg}"
        ),
        EventKind::TaskFailed => error!(
            task = e.as_task(),
            name = e.as_name(),
            reason = e.as_reason(),
            "{msg}"
        ),
        EventKind::TaskCancelled => info!(task = e.as_task(), name = e.as_name(), "{msg}"),

        // delivery
        EventKind::TaskAcknowledged => trace!(task = e.as_task(), "{msg}"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tcd_model::{Progress, TaskId};

    use super::*;

    #[test]
    fn view_defaults_for_missing_fields() {
        let ev = RunnerEvent::new(EventKind::TaskSubmitted, TaskId::from("t-1"), "scan");
        assert_eq!(ev.as_task(), "t-1");
        assert_eq!(ev.as_name(), "scan");
        assert_eq!(ev.as_reason(), "unknown");
        assert_eq!(ev.elapsed_ms(), 0);
        assert_eq!(ev.completed(), 0);
        assert_eq!(ev.progress_message(), "");
    }

    #[test]
    fn view_reads_progress_and_elapsed() {
        let ev = RunnerEvent::new(EventKind::TaskProgress, TaskId::from("t-1"), "scan")
            .with_progress(Progress::of(3, 8).with_message("pulling"))
            .with_elapsed(Duration::from_millis(1500));
        assert_eq!(ev.completed(), 3);
        assert_eq!(ev.total(), 8);
        assert_eq!(ev.progress_message(), "pulling");
        assert_eq!(ev.elapsed_ms(), 1500);
        // by reference too
        assert_eq!((&ev).kind(), EventKind::TaskProgress);
    }

    #[test]
    fn every_kind_has_a_message() {
        for kind in [
            EventKind::TaskSubmitted,
            EventKind::TaskStarting,
            EventKind::TaskProgress,
            EventKind::CancelRequested,
            EventKind::TaskCompleted,
            EventKind::TaskFailed,
            EventKind::TaskCancelled,
            EventKind::TaskAcknowledged,
        ] {
            assert!(!message_for(kind).is_empty());
        }
    }
}
