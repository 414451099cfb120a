use async_trait::async_trait;
use tcd_core::{RunnerEvent, Subscribe};

use crate::subscriber::view::log_event;

/// Writes every runner event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct Journal;

impl Journal {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for Journal {
    async fn on_event(&self, event: &RunnerEvent) {
        log_event(event);
    }
    fn name(&self) -> &'static str {
        "journal"
    }
    fn queue_capacity(&self) -> Option<usize> {
        Some(2048)
    }
}
