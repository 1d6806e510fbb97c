use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const LOG_RELATIVE_PATH: &str = "logs/coordinator.log";

/// Decision log shared by every coordinator writing under one state root.
/// Each entry is a single `ts=<now> task_id=<id> key=value ...` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorLog {
    path: PathBuf,
}

impl CoordinatorLog {
    pub fn in_state_root(state_root: &Path) -> Self {
        Self {
            path: state_root.join(LOG_RELATIVE_PATH),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, now: i64, task_id: &str, fields: &str) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "ts={now} task_id={task_id} {fields}")
    }
}
