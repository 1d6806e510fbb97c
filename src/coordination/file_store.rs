use crate::coordination::error::{io_error, json_error, CoordinatorError};
use crate::coordination::task::{Task, TaskState};
use crate::coordination::task_store::{ensure_matching_id, expected_version, TaskStore};
use crate::shared::ids::TaskId;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

pub const LOCK_WAIT: Duration = Duration::from_secs(2);
const LOCK_POLL: Duration = Duration::from_millis(5);

/// Task snapshots as pretty JSON files under `<state_root>/tasks`.
///
/// Writers serialize per task through a `<id>.lock` file created with
/// `create_new`. A writer waits up to [`LOCK_WAIT`] for the lock and reports a
/// conflict after that.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    state_root: PathBuf,
}

impl FileTaskStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.state_root.join("tasks")
    }

    pub fn task_path(&self, task_id: &str) -> Result<PathBuf, CoordinatorError> {
        let task_id = TaskId::parse(task_id).map_err(CoordinatorError::InvalidTaskId)?;
        Ok(self.tasks_dir().join(format!("{task_id}.json")))
    }

    fn lock_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{task_id}.lock"))
    }

    fn ensure_tasks_dir(&self) -> Result<(), CoordinatorError> {
        let dir = self.tasks_dir();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))
    }

    fn try_lock(&self, task_id: &str) -> Result<Option<TaskLock>, CoordinatorError> {
        let path = self.lock_path(task_id);
        let started = Instant::now();
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Some(TaskLock { path })),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if started.elapsed() >= LOCK_WAIT {
                        return Ok(None);
                    }
                    thread::sleep(LOCK_POLL);
                }
                Err(err) => return Err(io_error(&path, err)),
            }
        }
    }

    fn read(&self, path: &Path, task_id: &str) -> Result<Task, CoordinatorError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CoordinatorError::UnknownTask {
                    task_id: task_id.to_string(),
                })
            }
            Err(err) => return Err(io_error(path, err)),
        };
        serde_json::from_str(&raw).map_err(|e| json_error(path, e))
    }

    /// Replaces the snapshot through a sibling staging file. Callers hold the
    /// task lock, so one staging name per task cannot collide.
    fn write(&self, path: &Path, task: &Task) -> Result<(), CoordinatorError> {
        let body = serde_json::to_vec_pretty(task).map_err(|e| json_error(path, e))?;
        let staging = path.with_extension("json.tmp");
        let mut file = fs::File::create(&staging).map_err(|e| io_error(&staging, e))?;
        file.write_all(&body)
            .and_then(|()| file.sync_all())
            .map_err(|e| io_error(&staging, e))?;
        drop(file);
        fs::rename(&staging, path).map_err(|e| io_error(path, e))
    }
}

impl TaskStore for FileTaskStore {
    fn create(&self, task: &Task) -> Result<String, CoordinatorError> {
        let path = self.task_path(&task.task_id)?;
        self.ensure_tasks_dir()?;
        let Some(_lock) = self.try_lock(&task.task_id)? else {
            return Err(CoordinatorError::TaskExists {
                task_id: task.task_id.clone(),
            });
        };
        if path.exists() {
            return Err(CoordinatorError::TaskExists {
                task_id: task.task_id.clone(),
            });
        }
        self.write(&path, task)?;
        Ok(task.task_id.clone())
    }

    fn get(&self, task_id: &str) -> Result<Task, CoordinatorError> {
        let path = self.task_path(task_id)?;
        self.read(&path, task_id)
    }

    fn compare_and_set(
        &self,
        task_id: &str,
        expected: TaskState,
        updated: &Task,
    ) -> Result<(), CoordinatorError> {
        ensure_matching_id(task_id, updated)?;
        let path = self.task_path(task_id)?;
        if !path.exists() {
            return Err(CoordinatorError::UnknownTask {
                task_id: task_id.to_string(),
            });
        }
        let previous_version = expected_version(updated, expected)?;
        let Some(_lock) = self.try_lock(task_id)? else {
            return Err(CoordinatorError::StorageConflict {
                task_id: task_id.to_string(),
                expected,
            });
        };
        let current = self.read(&path, task_id)?;
        if current.state != expected || current.version != previous_version {
            return Err(CoordinatorError::StorageConflict {
                task_id: task_id.to_string(),
                expected,
            });
        }
        self.write(&path, updated)
    }
}

struct TaskLock {
    path: PathBuf,
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
