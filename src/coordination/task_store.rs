use crate::coordination::error::CoordinatorError;
use crate::coordination::task::{Task, TaskState};

/// Durable home for task snapshots.
///
/// Every update is a compare-and-set on the persisted snapshot: the write only
/// lands when the stored task is still in `expected` and `updated.version` is
/// exactly one past the stored version. Otherwise the caller gets
/// [`CoordinatorError::StorageConflict`] and nothing changes. A `get` after a
/// successful write on the same id observes that write.
pub trait TaskStore: Send + Sync {
    /// Persists a new task. Fails with [`CoordinatorError::TaskExists`] when
    /// the id is taken.
    fn create(&self, task: &Task) -> Result<String, CoordinatorError>;

    fn get(&self, task_id: &str) -> Result<Task, CoordinatorError>;

    fn compare_and_set(
        &self,
        task_id: &str,
        expected: TaskState,
        updated: &Task,
    ) -> Result<(), CoordinatorError>;
}

impl<T: TaskStore + ?Sized> TaskStore for Box<T> {
    fn create(&self, task: &Task) -> Result<String, CoordinatorError> {
        (**self).create(task)
    }

    fn get(&self, task_id: &str) -> Result<Task, CoordinatorError> {
        (**self).get(task_id)
    }

    fn compare_and_set(
        &self,
        task_id: &str,
        expected: TaskState,
        updated: &Task,
    ) -> Result<(), CoordinatorError> {
        (**self).compare_and_set(task_id, expected, updated)
    }
}

impl<T: TaskStore + ?Sized> TaskStore for std::sync::Arc<T> {
    fn create(&self, task: &Task) -> Result<String, CoordinatorError> {
        (**self).create(task)
    }

    fn get(&self, task_id: &str) -> Result<Task, CoordinatorError> {
        (**self).get(task_id)
    }

    fn compare_and_set(
        &self,
        task_id: &str,
        expected: TaskState,
        updated: &Task,
    ) -> Result<(), CoordinatorError> {
        (**self).compare_and_set(task_id, expected, updated)
    }
}

pub(crate) fn ensure_matching_id(task_id: &str, updated: &Task) -> Result<(), CoordinatorError> {
    if updated.task_id != task_id {
        return Err(CoordinatorError::InvalidTaskId(format!(
            "snapshot id `{}` does not match `{task_id}`",
            updated.task_id
        )));
    }
    Ok(())
}

/// Version the stored snapshot must carry for `updated` to replace it.
pub(crate) fn expected_version(
    updated: &Task,
    expected: TaskState,
) -> Result<u64, CoordinatorError> {
    updated
        .version
        .checked_sub(1)
        .ok_or_else(|| CoordinatorError::StorageConflict {
            task_id: updated.task_id.clone(),
            expected,
        })
}
