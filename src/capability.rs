use crate::coordination::task::{CapabilityKind, StepResult, StepStatus};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

pub mod command;
pub mod output_parse;

pub use command::CommandCapability;
pub use output_parse::{parse_capability_reply, CapabilityReply};

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability program missing for {kind}: {program}")]
    MissingProgram {
        kind: CapabilityKind,
        program: String,
    },
    #[error("capability {kind} timed out after {timeout_ms}ms")]
    Timeout { kind: CapabilityKind, timeout_ms: u64 },
    #[error("capability {kind} failed with exit code {exit_code}: {stderr}")]
    NonZeroExit {
        kind: CapabilityKind,
        exit_code: i32,
        stderr: String,
    },
    #[error("capability {kind} returned invalid output: {reason}")]
    InvalidOutput { kind: CapabilityKind, reason: String },
    #[error("capability {kind} panicked: {message}")]
    Panicked {
        kind: CapabilityKind,
        message: String,
    },
    #[error("capability {kind} failed: {message}")]
    Failed {
        kind: CapabilityKind,
        message: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a capability sees for one step.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityRequest<'a> {
    pub task_id: &'a str,
    pub kind: CapabilityKind,
    pub focused_input: &'a str,
    pub context: &'a [StepResult],
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityResponse {
    pub status: StepStatus,
    pub payload: Value,
    pub summary: String,
}

impl CapabilityResponse {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Success,
            payload: Value::Null,
            summary: summary.into(),
        }
    }

    pub fn with_status(status: StepStatus, summary: impl Into<String>) -> Self {
        Self {
            status,
            payload: Value::Null,
            summary: summary.into(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

pub trait Capability: Send + Sync {
    fn invoke(&self, request: &CapabilityRequest<'_>)
        -> Result<CapabilityResponse, CapabilityError>;
}

impl<F> Capability for F
where
    F: Fn(&CapabilityRequest<'_>) -> Result<CapabilityResponse, CapabilityError> + Send + Sync,
{
    fn invoke(
        &self,
        request: &CapabilityRequest<'_>,
    ) -> Result<CapabilityResponse, CapabilityError> {
        self(request)
    }
}

/// Pins a closure to the capability signature so it can be passed where an
/// `impl Capability` is expected.
pub fn capability_fn<F>(f: F) -> F
where
    F: Fn(&CapabilityRequest<'_>) -> Result<CapabilityResponse, CapabilityError> + Send + Sync,
{
    f
}

/// One implementation per capability kind.
pub struct CapabilitySet {
    diagnosis: Box<dyn Capability>,
    automation: Box<dyn Capability>,
    writing: Box<dyn Capability>,
}

impl CapabilitySet {
    pub fn new(
        diagnosis: impl Capability + 'static,
        automation: impl Capability + 'static,
        writing: impl Capability + 'static,
    ) -> Self {
        Self::from_boxed(Box::new(diagnosis), Box::new(automation), Box::new(writing))
    }

    pub fn from_boxed(
        diagnosis: Box<dyn Capability>,
        automation: Box<dyn Capability>,
        writing: Box<dyn Capability>,
    ) -> Self {
        Self {
            diagnosis,
            automation,
            writing,
        }
    }

    pub fn for_kind(&self, kind: CapabilityKind) -> &dyn Capability {
        match kind {
            CapabilityKind::Diagnosis => self.diagnosis.as_ref(),
            CapabilityKind::Automation => self.automation.as_ref(),
            CapabilityKind::Writing => self.writing.as_ref(),
        }
    }

    /// Dispatches to the capability for `request.kind`. A panic inside the
    /// capability is reported as [`CapabilityError::Panicked`].
    pub fn invoke(
        &self,
        request: &CapabilityRequest<'_>,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let capability = self.for_kind(request.kind);
        match catch_unwind(AssertUnwindSafe(|| capability.invoke(request))) {
            Ok(outcome) => outcome,
            Err(panic) => Err(CapabilityError::Panicked {
                kind: request.kind,
                message: panic_message(panic.as_ref()),
            }),
        }
    }
}

impl std::fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySet").finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic payload".to_string()
}

/// Maps a diagnosis confidence score and problem flag onto a step status.
/// Low confidence wins over "no problem identified".
pub fn diagnosis_status(
    confidence: Option<u8>,
    problem_identified: Option<bool>,
    low_confidence_threshold: u8,
) -> StepStatus {
    if confidence.is_some_and(|score| score < low_confidence_threshold) {
        return StepStatus::LowConfidence;
    }
    if problem_identified == Some(false) {
        return StepStatus::NoProblemIdentified;
    }
    StepStatus::Success
}

pub(crate) fn io_error(path: &str, source: std::io::Error) -> CapabilityError {
    CapabilityError::Io {
        path: path.to_string(),
        source,
    }
}

pub(crate) fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
