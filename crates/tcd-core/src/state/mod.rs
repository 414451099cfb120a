use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak},
    time::SystemTime,
};

use tcd_model::{Progress, TaskId, TaskInfo, TaskName, TaskPage, TaskQuery, TaskStatus};

use crate::error::CoreError;

/// Cancellation hook the registry keeps for every live task.
pub(crate) trait Control: Send + Sync {
    fn cancel(&self) -> Result<(), CoreError>;
}

/// In-memory registry of live tasks.
///
/// A task is added on submission and removed once its outcome was delivered on the
/// interactive thread.
#[derive(Clone)]
pub struct TaskState {
    inner: Arc<RwLock<TaskStateInner>>,
}

struct TaskStateInner {
    /// Tasks indexed by TaskId.
    tasks: HashMap<TaskId, Entry>,
    /// Index: name -> list of task IDs with that name.
    by_name: HashMap<TaskName, Vec<TaskId>>,
}

struct Entry {
    info: TaskInfo,
    control: Weak<dyn Control>,
}

impl TaskState {
    /// Create empty task state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(TaskStateInner {
                tasks: HashMap::new(),
                by_name: HashMap::new(),
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TaskStateInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TaskStateInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a newly submitted task.
    pub(crate) fn add_task(&self, id: TaskId, name: TaskName, control: Weak<dyn Control>) {
        let mut inner = self.write();

        let info = TaskInfo::pending(id.clone(), name.clone());
        inner.tasks.insert(id.clone(), Entry { info, control });
        inner.by_name.entry(name).or_default().push(id);
    }

    /// Update task status (mirrors transitions made by the task itself).
    pub(crate) fn update_status(&self, id: &TaskId, status: TaskStatus, error: Option<String>) {
        let mut inner = self.write();

        if let Some(entry) = inner.tasks.get_mut(id) {
            entry.info.status = status;
            entry.info.updated_at = SystemTime::now();
            if let Some(err) = error {
                entry.info.error = Some(err);
            }
        }
    }

    /// Store the latest progress snapshot.
    pub(crate) fn record_progress(&self, id: &TaskId, progress: Progress) {
        let mut inner = self.write();

        if let Some(entry) = inner.tasks.get_mut(id) {
            entry.info.progress = Some(progress);
            entry.info.updated_at = SystemTime::now();
        }
    }

    pub(crate) fn mark_cancel_requested(&self, id: &TaskId) {
        let mut inner = self.write();

        if let Some(entry) = inner.tasks.get_mut(id) {
            entry.info.cancel_requested = true;
            entry.info.updated_at = SystemTime::now();
        }
    }

    /// Remove task from state (after its outcome was delivered).
    pub(crate) fn remove_task(&self, id: &TaskId) {
        let mut inner = self.write();

        if let Some(entry) = inner.tasks.remove(id)
            && let Some(ids) = inner.by_name.get_mut(&entry.info.name)
        {
            ids.retain(|task_id| task_id != id);
            if ids.is_empty() {
                inner.by_name.remove(&entry.info.name);
            }
        }
    }

    /// Request cooperative cancellation of a live task.
    pub fn cancel(&self, id: &TaskId) -> Result<(), CoreError> {
        let control = {
            let inner = self.read();
            inner
                .tasks
                .get(id)
                .and_then(|entry| entry.control.upgrade())
                .ok_or_else(|| CoreError::NotFound(id.clone()))?
        };
        control.cancel()
    }

    /// Request cancellation of every live task. Returns how many accepted the request.
    pub fn cancel_all(&self) -> usize {
        let controls: Vec<Arc<dyn Control>> = {
            let inner = self.read();
            inner
                .tasks
                .values()
                .filter_map(|entry| entry.control.upgrade())
                .collect()
        };
        controls.iter().filter(|c| c.cancel().is_ok()).count()
    }

    /// Get task info by ID.
    pub fn get(&self, id: &TaskId) -> Option<TaskInfo> {
        let inner = self.read();
        inner.tasks.get(id).map(|entry| entry.info.clone())
    }

    /// List all tasks with the given name.
    pub fn list_by_name(&self, name: &str) -> Vec<TaskInfo> {
        let inner = self.read();

        inner
            .by_name
            .get(name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.tasks.get(id).map(|entry| entry.info.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// List all tasks.
    pub fn list_all(&self) -> Vec<TaskInfo> {
        let inner = self.read();
        inner.tasks.values().map(|entry| entry.info.clone()).collect()
    }

    /// List tasks matching a status filter.
    pub fn list_by_status(&self, status: TaskStatus) -> Vec<TaskInfo> {
        let inner = self.read();
        inner
            .tasks
            .values()
            .filter(|entry| entry.info.status == status)
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query tasks with combined filters and pagination.
    ///
    /// Filters are applied inside a single read lock.
    /// When `name` is specified, uses the `by_name` index to narrow the scan.
    /// `total` in the result reflects the count *after* filtering, *before* pagination.
    pub fn query(&self, q: &TaskQuery) -> TaskPage<TaskInfo> {
        let inner = self.read();

        let iter: Box<dyn Iterator<Item = &TaskInfo>> = match &q.name {
            Some(name) => match inner.by_name.get(name.as_str()) {
                Some(ids) => Box::new(
                    ids.iter()
                        .filter_map(|id| inner.tasks.get(id).map(|entry| &entry.info)),
                ),
                None => {
                    return TaskPage {
                        items: vec![],
                        total: 0,
                    };
                }
            },
            None => Box::new(inner.tasks.values().map(|entry| &entry.info)),
        };

        let iter: Box<dyn Iterator<Item = &TaskInfo>> = match q.status {
            Some(status) => Box::new(iter.filter(move |info| info.status == status)),
            None => iter,
        };

        let filtered: Vec<&TaskInfo> = iter.collect();
        let total = filtered.len();

        let items = filtered
            .into_iter()
            .skip(q.offset)
            .take(q.limit)
            .cloned()
            .collect();

        TaskPage { items, total }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new()
    }
}
