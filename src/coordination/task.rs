use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Received,
    Planned,
    AwaitingApproval,
    Executing,
    Completed,
    Failed,
    Rejected,
}

impl TaskState {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (TaskState::Received, TaskState::Planned)
                | (TaskState::Received, TaskState::Failed)
                | (TaskState::Planned, TaskState::AwaitingApproval)
                | (TaskState::Planned, TaskState::Executing)
                | (TaskState::AwaitingApproval, TaskState::Executing)
                | (TaskState::AwaitingApproval, TaskState::Rejected)
                | (TaskState::Executing, TaskState::Completed)
                | (TaskState::Executing, TaskState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Received => "received",
            TaskState::Planned => "planned",
            TaskState::AwaitingApproval => "awaiting_approval",
            TaskState::Executing => "executing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of specialist capabilities a step can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Diagnosis,
    Automation,
    Writing,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [
        CapabilityKind::Diagnosis,
        CapabilityKind::Automation,
        CapabilityKind::Writing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityKind::Diagnosis => "diagnosis",
            CapabilityKind::Automation => "automation",
            CapabilityKind::Writing => "writing",
        }
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    LowConfidence,
    NoProblemIdentified,
    Error,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::LowConfidence => "low_confidence",
            StepStatus::NoProblemIdentified => "no_problem_identified",
            StepStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "success" => Ok(Self::Success),
            "low_confidence" => Ok(Self::LowConfidence),
            "no_problem_identified" => Ok(Self::NoProblemIdentified),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "step status `{other}` must be one of: success, low_confidence, no_problem_identified, error"
            )),
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub kind: CapabilityKind,
    pub description: String,
    /// History positions whose summaries this step folds into its input.
    #[serde(default)]
    pub summarizes: Vec<usize>,
}

impl Step {
    pub fn new(kind: CapabilityKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            summarizes: Vec::new(),
        }
    }

    pub fn summarizing(mut self, positions: impl IntoIterator<Item = usize>) -> Self {
        self.summarizes = positions.into_iter().collect();
        self
    }
}

/// Ordered steps plus the index of the next step to run.
///
/// A plan is never edited in place. Branching produces a new value through
/// [`Plan::replace_remaining`], which keeps every executed step where it was so
/// that `steps()[i]` keeps matching `history[i]` for `i < cursor()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    steps: Vec<Step>,
    cursor: usize,
    #[serde(default)]
    summary: String,
}

impl Plan {
    pub fn new(steps: Vec<Step>, summary: impl Into<String>) -> Self {
        Self {
            steps,
            cursor: 0,
            summary: summary.into(),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    pub fn advance(&self) -> Self {
        Self {
            steps: self.steps.clone(),
            cursor: (self.cursor + 1).min(self.steps.len()),
            summary: self.summary.clone(),
        }
    }

    /// Keeps `steps[..=executed_through]` and swaps everything after it for
    /// `suffix`. The cursor is carried over unchanged.
    pub fn replace_remaining(&self, executed_through: usize, suffix: Vec<Step>) -> Self {
        let keep = (executed_through + 1).min(self.steps.len());
        let mut steps = self.steps[..keep].to_vec();
        steps.extend(suffix);
        let summary = summarize_kinds(&steps);
        Self {
            steps,
            cursor: self.cursor,
            summary,
        }
    }
}

pub fn summarize_kinds(steps: &[Step]) -> String {
    steps
        .iter()
        .map(|step| step.kind.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step: Step,
    pub status: StepStatus,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub summary: String,
    pub started_at: i64,
    pub ended_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    UnplannableRequest,
    CapabilityError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
    #[serde(default)]
    pub step_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub request: String,
    #[serde(default)]
    pub require_approval: bool,
    pub state: TaskState,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub history: Vec<StepResult>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<TaskError>,
    #[serde(default)]
    pub plan_revision: u32,
    /// Bumped by one on every stored write; the store rejects any other step.
    #[serde(default)]
    pub version: u64,
    /// Set while a flow is executing the plan. Resume refuses the task until
    /// it passes.
    #[serde(default)]
    pub lease_expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn received(
        task_id: impl Into<String>,
        request: impl Into<String>,
        require_approval: bool,
        now: i64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            request: request.into(),
            require_approval,
            state: TaskState::Received,
            plan: None,
            history: Vec::new(),
            output: None,
            error: None,
            plan_revision: 0,
            version: 0,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Final output: the last writing result when there is one, otherwise every
/// summary in execution order.
pub fn aggregate_output(history: &[StepResult]) -> String {
    if let Some(writing) = history
        .iter()
        .rev()
        .find(|result| result.step.kind == CapabilityKind::Writing)
    {
        return writing.summary.clone();
    }
    history
        .iter()
        .map(|result| result.summary.trim())
        .filter(|summary| !summary.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
