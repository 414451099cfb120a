mod task_id;
pub use task_id::TaskId;

mod task_status;
pub use task_status::TaskStatus;

mod progress;
pub use progress::Progress;

mod task_info;
pub use task_info::TaskInfo;

mod task_query;
pub use task_query::{TaskPage, TaskQuery};

/// Human-readable task name.
///
/// Names are not unique; several tasks may share one (e.g. repeated "load-remotes" jobs).
pub type TaskName = String;

/// Name given to tasks submitted without one.
pub const DEFAULT_TASK_NAME: &str = "task";
