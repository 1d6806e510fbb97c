pub mod branch;
pub mod coordinator;
pub mod error;
pub mod file_store;
pub mod focus;
pub mod plan_builder;
pub mod sqlite_store;
pub mod task;
pub mod task_store;

pub use branch::{evaluate, BranchDecision};
pub use coordinator::Coordinator;
pub use error::CoordinatorError;
pub use file_store::FileTaskStore;
pub use focus::{focus, FocusLimits};
pub use plan_builder::{PlanBuilder, PlanError};
pub use sqlite_store::SqliteTaskStore;
pub use task::{
    aggregate_output, CapabilityKind, Plan, Step, StepResult, StepStatus, Task, TaskError,
    TaskErrorKind, TaskState,
};
pub use task_store::TaskStore;
