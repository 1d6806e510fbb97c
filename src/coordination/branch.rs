use crate::coordination::task::{CapabilityKind, Plan, Step, StepResult, StepStatus};

const INCONCLUSIVE_REPORT: &str = "Report that the diagnosis was inconclusive: confidence was too low (low-confidence result) to justify automated remediation, so no fix was applied. Summarize the evidence gathered and recommend next investigative steps.";

const NO_PROBLEM_REPORT: &str = "Report the outcome as: no actionable problem found. The diagnosis identified nothing requiring remediation, so no fix was applied. Summarize what was checked.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchDecision {
    Continue,
    Inconclusive,
    NoProblem,
}

impl BranchDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            BranchDecision::Continue => "continue",
            BranchDecision::Inconclusive => "inconclusive",
            BranchDecision::NoProblem => "no_problem",
        }
    }
}

pub fn decide(result: &StepResult) -> BranchDecision {
    if result.step.kind != CapabilityKind::Diagnosis {
        return BranchDecision::Continue;
    }
    match result.status {
        StepStatus::LowConfidence => BranchDecision::Inconclusive,
        StepStatus::NoProblemIdentified => BranchDecision::NoProblem,
        StepStatus::Success | StepStatus::Error => BranchDecision::Continue,
    }
}

/// Returns the plan to continue with after `result`, which was produced by the
/// step at `cursor`.
///
/// Only diagnosis results can change the plan. On an inconclusive or empty
/// diagnosis the remaining automation work is dropped and the remaining writing
/// work collapses into a single closing report. Steps up to `cursor` are never
/// touched.
pub fn evaluate(result: &StepResult, plan: &Plan, cursor: usize) -> Plan {
    let framing = match decide(result) {
        BranchDecision::Continue => return plan.clone(),
        BranchDecision::Inconclusive => INCONCLUSIVE_REPORT,
        BranchDecision::NoProblem => NO_PROBLEM_REPORT,
    };

    let remaining = plan.steps().get(cursor + 1..).unwrap_or_default();
    let mut suffix: Vec<Step> = remaining
        .iter()
        .filter(|step| step.kind == CapabilityKind::Diagnosis)
        .cloned()
        .collect();

    let original_writing = remaining
        .iter()
        .filter(|step| step.kind == CapabilityKind::Writing)
        .map(|step| step.description.trim())
        .filter(|description| !description.is_empty())
        .collect::<Vec<_>>();
    let mut description = framing.to_string();
    if !original_writing.is_empty() {
        description.push_str(" Address the original communication request: ");
        description.push_str(&original_writing.join("; "));
    }

    let writing_position = cursor + 1 + suffix.len();
    suffix.push(Step::new(CapabilityKind::Writing, description).summarizing(0..writing_position));
    plan.replace_remaining(cursor, suffix)
}
