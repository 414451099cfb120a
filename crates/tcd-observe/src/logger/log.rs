use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing::{Subscriber, dispatcher};
use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError,
};

use crate::logger::{config::LoggerConfig, error::LoggerError};

pub(crate) fn init_text(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = filter(&cfg.level)?;
    let layer = fmt::layer()
        .with_ansi(cfg.use_color)
        .with_target(cfg.with_targets)
        .with_thread_names(cfg.with_threads)
        .with_timer(timer());

    install(tracing_subscriber::registry().with(filter).with(layer))
}

pub(crate) fn init_json(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = filter(&cfg.level)?;
    let layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(cfg.with_targets)
        .with_thread_names(cfg.with_threads)
        .with_timer(timer());

    install(tracing_subscriber::registry().with(filter).with(layer))
}

pub(crate) fn init_journald(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    journald(filter(&cfg.level)?)
}

pub(crate) fn filter(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLogLevel(level.to_string()))
}

/// RFC 3339 timestamps in the local offset (UTC when the offset cannot be determined).
fn timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn init_error(err: TryInitError) -> LoggerError {
    if dispatcher::has_been_set() {
        LoggerError::AlreadyInitialized
    } else {
        LoggerError::InitializationFailed(err.to_string())
    }
}

fn install<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(init_error)
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn journald(filter: EnvFilter) -> Result<(), LoggerError> {
    let layer = tracing_journald::layer()
        .map_err(|e| LoggerError::InitializationFailed(format!("journald: {e}")))?;
    install(tracing_subscriber::registry().with(filter).with(layer))
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn journald(_filter: EnvFilter) -> Result<(), LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}
