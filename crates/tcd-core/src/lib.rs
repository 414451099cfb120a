pub mod config;
pub use config::RunnerConfig;
pub mod dispatch;
pub use dispatch::{Dispatch, EventLoop, Job, LoopDispatcher};
pub mod error;
pub use error::CoreError;
pub mod event;
pub use event::{EventKind, RunnerEvent};
pub mod fault;
pub use fault::{Fault, FaultHandler, FaultSource, LogFaults, PanicHookGuard, install_panic_hook};
pub mod metrics;
pub use metrics::{MetricsBackend, NoOpMetrics};
pub mod runner;
pub use runner::{RunnerBuilder, TaskRunner};
pub mod state;
pub use state::TaskState;
pub mod subscriber;
pub use subscriber::Subscribe;
pub mod system;
pub use system::{InstanceGuard, default_lock_path};
mod task;
pub use task::TaskHandle;
pub mod work;
pub use work::{CancelCheck, Outcome, ProgressReporter, WorkContext, WorkError, WorkResult};
