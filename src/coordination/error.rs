use crate::config::ConfigError;
use crate::coordination::task::{CapabilityKind, TaskState};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("task `{task_id}` request is unplannable: {reason}")]
    UnplannableRequest { task_id: String, reason: String },
    #[error("task `{task_id}` step {step_index} ({kind}) failed: {reason}")]
    Capability {
        task_id: String,
        step_index: usize,
        kind: CapabilityKind,
        reason: String,
    },
    #[error("task `{task_id}` cannot {action} from state `{from}`")]
    InvalidStateTransition {
        task_id: String,
        from: TaskState,
        action: String,
    },
    #[error("task `{task_id}` was modified concurrently (expected state `{expected}`)")]
    StorageConflict { task_id: String, expected: TaskState },
    #[error("task `{task_id}` is being executed by another run until {lease_expires_at}")]
    RunInProgress {
        task_id: String,
        lease_expires_at: i64,
    },
    #[error("task `{task_id}` not found")]
    UnknownTask { task_id: String },
    #[error("task `{task_id}` already exists")]
    TaskExists { task_id: String },
    #[error("invalid task id: {0}")]
    InvalidTaskId(String),
    #[error("failed to allocate a task id: {0}")]
    TaskIdAllocation(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("sqlite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },
}

impl From<ConfigError> for CoordinatorError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> CoordinatorError {
    CoordinatorError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn json_error(path: &Path, source: serde_json::Error) -> CoordinatorError {
    CoordinatorError::Json {
        path: path.display().to_string(),
        source,
    }
}
