use crate::coordination::error::{io_error, CoordinatorError};
use crate::coordination::task::{Task, TaskState};
use crate::coordination::task_store::{ensure_matching_id, expected_version, TaskStore};
use crate::shared::ids::TaskId;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TASKS_DB_FILE_NAME: &str = "tasks.sqlite3";

/// Task snapshots in one sqlite table. Compare-and-set is a conditional
/// `UPDATE` on the stored state and version columns.
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    db_path: PathBuf,
}

impl SqliteTaskStore {
    pub fn open(db_path: &Path) -> Result<Self, CoordinatorError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_state_root(state_root: &Path) -> Result<Self, CoordinatorError> {
        Self::open(&state_root.join(TASKS_DB_FILE_NAME))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn ensure_schema(&self) -> Result<(), CoordinatorError> {
        let connection = self.connect()?;
        connection.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY NOT NULL,
                state TEXT NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);
            ",
        )?;
        Ok(())
    }

    fn connect(&self) -> Result<Connection, CoordinatorError> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(connection)
    }
}

fn encode(task: &Task) -> Result<String, CoordinatorError> {
    serde_json::to_string(task).map_err(|source| CoordinatorError::Json {
        path: format!("tasks/{}", task.task_id),
        source,
    })
}

fn version_param(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

impl TaskStore for SqliteTaskStore {
    fn create(&self, task: &Task) -> Result<String, CoordinatorError> {
        TaskId::parse(&task.task_id).map_err(CoordinatorError::InvalidTaskId)?;
        let body = encode(task)?;
        let connection = self.connect()?;
        let inserted = connection.execute(
            "
            INSERT INTO tasks (task_id, state, version, body, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(task_id) DO NOTHING
            ",
            params![
                task.task_id,
                task.state.as_str(),
                version_param(task.version),
                body,
                task.created_at,
                task.updated_at
            ],
        )?;
        if inserted == 0 {
            return Err(CoordinatorError::TaskExists {
                task_id: task.task_id.clone(),
            });
        }
        Ok(task.task_id.clone())
    }

    fn get(&self, task_id: &str) -> Result<Task, CoordinatorError> {
        TaskId::parse(task_id).map_err(CoordinatorError::InvalidTaskId)?;
        let connection = self.connect()?;
        let body: Option<String> = connection
            .query_row(
                "SELECT body FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(body) = body else {
            return Err(CoordinatorError::UnknownTask {
                task_id: task_id.to_string(),
            });
        };
        serde_json::from_str(&body).map_err(|source| CoordinatorError::Json {
            path: format!("tasks/{task_id}"),
            source,
        })
    }

    fn compare_and_set(
        &self,
        task_id: &str,
        expected: TaskState,
        updated: &Task,
    ) -> Result<(), CoordinatorError> {
        TaskId::parse(task_id).map_err(CoordinatorError::InvalidTaskId)?;
        ensure_matching_id(task_id, updated)?;
        let body = encode(updated)?;
        let connection = self.connect()?;
        if let Ok(previous_version) = expected_version(updated, expected) {
            let changed = connection.execute(
                "
                UPDATE tasks
                SET state = ?1, version = ?2, body = ?3, updated_at = ?4
                WHERE task_id = ?5 AND state = ?6 AND version = ?7
                ",
                params![
                    updated.state.as_str(),
                    version_param(updated.version),
                    body,
                    updated.updated_at,
                    task_id,
                    expected.as_str(),
                    version_param(previous_version)
                ],
            )?;
            if changed == 1 {
                return Ok(());
            }
        }

        let exists: Option<String> = connection
            .query_row(
                "SELECT state FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            None => Err(CoordinatorError::UnknownTask {
                task_id: task_id.to_string(),
            }),
            Some(_) => Err(CoordinatorError::StorageConflict {
                task_id: task_id.to_string(),
                expected,
            }),
        }
    }
}
