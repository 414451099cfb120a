use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::{Progress, TaskId, TaskName, TaskStatus};

/// Registry snapshot of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Unique task identifier.
    pub id: TaskId,
    /// Display name given at submission.
    pub name: TaskName,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// When the task was submitted.
    #[serde(with = "time_serde")]
    pub created_at: SystemTime,
    /// When the task last changed (status, progress or cancel request).
    #[serde(with = "time_serde")]
    pub updated_at: SystemTime,
    /// Last progress snapshot reported by the task body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    /// Whether cancellation was requested.
    #[serde(default)]
    pub cancel_requested: bool,
    /// Failure reason (if status is Failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskInfo {
    pub fn pending(id: TaskId, name: TaskName) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            name,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            progress: None,
            cancel_requested: false,
            error: None,
        }
    }
}

mod time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        since_epoch.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}
