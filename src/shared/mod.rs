pub mod ids;
pub mod logging;

pub use ids::{generate_task_id, validate_identifier_value, TaskId};
pub use logging::CoordinatorLog;
