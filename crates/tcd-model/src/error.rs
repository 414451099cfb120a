use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown task status: {0} (expected: pending|running|completed|failed|cancelled)")]
    UnknownStatus(String),
}
