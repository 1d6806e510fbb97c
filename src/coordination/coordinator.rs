use crate::capability::{CapabilityRequest, CapabilitySet};
use crate::config::DEFAULT_RUN_LEASE_SECONDS;
use crate::coordination::branch::{self, BranchDecision};
use crate::coordination::error::CoordinatorError;
use crate::coordination::focus::{focus, FocusLimits};
use crate::coordination::plan_builder::{PlanBuilder, PlanError};
use crate::coordination::task::{
    aggregate_output, Step, StepResult, StepStatus, Task, TaskError, TaskErrorKind, TaskState,
};
use crate::coordination::task_store::TaskStore;
use crate::shared::ids::generate_task_id;
use crate::shared::logging::CoordinatorLog;
use serde_json::Value;
use std::path::Path;
use std::time::Instant;

const MAX_TASK_ID_ATTEMPTS: usize = 8;

/// Drives tasks from submission to a terminal state.
///
/// Holds no lock of its own. Every write goes through
/// [`TaskStore::compare_and_set`] with the task version bumped by one, so
/// concurrent callers racing on one task see at most one winner and the rest
/// get [`CoordinatorError::StorageConflict`]. While a flow executes the plan it
/// holds a lease on the task, renewed at every checkpoint; `resume` refuses a
/// task whose lease has not expired.
#[derive(Debug)]
pub struct Coordinator<S: TaskStore> {
    store: S,
    planner: PlanBuilder,
    capabilities: CapabilitySet,
    limits: FocusLimits,
    run_lease_seconds: i64,
    log: Option<CoordinatorLog>,
}

impl<S: TaskStore> Coordinator<S> {
    pub fn new(store: S, capabilities: CapabilitySet) -> Self {
        Self {
            store,
            planner: PlanBuilder::new(),
            capabilities,
            limits: FocusLimits::default(),
            run_lease_seconds: lease_seconds(DEFAULT_RUN_LEASE_SECONDS),
            log: None,
        }
    }

    pub fn with_focus_limits(mut self, limits: FocusLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_run_lease_seconds(mut self, seconds: u64) -> Self {
        self.run_lease_seconds = lease_seconds(seconds);
        self
    }

    /// Appends decision lines under `<state_root>/logs`. Failing to write a
    /// line never fails the task.
    pub fn with_log_root(mut self, state_root: impl AsRef<Path>) -> Self {
        self.log = Some(CoordinatorLog::in_state_root(state_root.as_ref()));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log.as_ref().map(CoordinatorLog::path)
    }

    /// Accepts a request and carries it as far as it can go: to the approval
    /// gate when `require_approval` is set, otherwise to a terminal state.
    pub fn submit(
        &self,
        request: &str,
        require_approval: bool,
        now: i64,
    ) -> Result<Task, CoordinatorError> {
        let task = self.create_task(request, require_approval, now)?;
        self.log(
            &task.task_id,
            now,
            format!("decision=received require_approval={require_approval}"),
        );
        self.plan_task(task, now)
    }

    pub fn approve(&self, task_id: &str, now: i64) -> Result<Task, CoordinatorError> {
        let task = self.store.get(task_id)?;
        if task.state != TaskState::AwaitingApproval {
            return Err(invalid_transition(&task, "approve"));
        }
        let lease = self.lease_until(now);
        let task = self.commit(
            &task,
            TaskState::Executing,
            |next| next.lease_expires_at = Some(lease),
            now,
        )?;
        self.log(&task.task_id, now, "decision=approved");
        self.run_steps(task, now)
    }

    pub fn reject(&self, task_id: &str, now: i64) -> Result<Task, CoordinatorError> {
        let task = self.store.get(task_id)?;
        if task.state != TaskState::AwaitingApproval {
            return Err(invalid_transition(&task, "reject"));
        }
        let task = self.commit(&task, TaskState::Rejected, |_| {}, now)?;
        self.log(&task.task_id, now, "decision=rejected");
        Ok(task)
    }

    pub fn status(&self, task_id: &str) -> Result<Task, CoordinatorError> {
        self.store.get(task_id)
    }

    /// Continues a task that stopped short of a terminal state without waiting
    /// on an operator. An executing task is claimed first; the step that was in
    /// flight when the previous run died runs again.
    pub fn resume(&self, task_id: &str, now: i64) -> Result<Task, CoordinatorError> {
        let task = self.store.get(task_id)?;
        self.log(
            &task.task_id,
            now,
            format!("decision=resume state={}", task.state),
        );
        match task.state {
            TaskState::Received => self.plan_task(task, now),
            TaskState::Planned => self.enter_gate(task, now),
            TaskState::Executing => {
                let task = self.claim_run(task, now)?;
                self.run_steps(task, now)
            }
            TaskState::AwaitingApproval
            | TaskState::Completed
            | TaskState::Failed
            | TaskState::Rejected => Err(invalid_transition(&task, "resume")),
        }
    }

    fn create_task(
        &self,
        request: &str,
        require_approval: bool,
        now: i64,
    ) -> Result<Task, CoordinatorError> {
        for _ in 0..MAX_TASK_ID_ATTEMPTS {
            let task_id = generate_task_id(now).map_err(CoordinatorError::TaskIdAllocation)?;
            let task = Task::received(task_id.into_string(), request, require_approval, now);
            match self.store.create(&task) {
                Ok(_) => return Ok(task),
                Err(CoordinatorError::TaskExists { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(CoordinatorError::TaskIdAllocation(format!(
            "no free task id after {MAX_TASK_ID_ATTEMPTS} attempts"
        )))
    }

    fn plan_task(&self, task: Task, now: i64) -> Result<Task, CoordinatorError> {
        match self.planner.build(&task.request) {
            Ok(plan) => {
                let summary = plan.summary().to_string();
                let task = self.commit(
                    &task,
                    TaskState::Planned,
                    |next| {
                        next.plan = Some(plan);
                        next.plan_revision = 1;
                    },
                    now,
                )?;
                self.log(
                    &task.task_id,
                    now,
                    format!("decision=planned plan=\"{summary}\""),
                );
                self.enter_gate(task, now)
            }
            Err(PlanError::NoCapability) => {
                let reason = PlanError::NoCapability.to_string();
                let task = self.commit(
                    &task,
                    TaskState::Failed,
                    |next| {
                        next.error = Some(TaskError {
                            kind: TaskErrorKind::UnplannableRequest,
                            message: reason.clone(),
                            step_index: None,
                        });
                    },
                    now,
                )?;
                self.log(&task.task_id, now, "decision=unplannable transition=failed");
                Err(CoordinatorError::UnplannableRequest {
                    task_id: task.task_id,
                    reason,
                })
            }
        }
    }

    fn enter_gate(&self, task: Task, now: i64) -> Result<Task, CoordinatorError> {
        if task.require_approval {
            let task = self.commit(&task, TaskState::AwaitingApproval, |_| {}, now)?;
            self.log(&task.task_id, now, "decision=awaiting_approval");
            return Ok(task);
        }
        let lease = self.lease_until(now);
        let task = self.commit(
            &task,
            TaskState::Executing,
            |next| next.lease_expires_at = Some(lease),
            now,
        )?;
        self.log(&task.task_id, now, "decision=executing");
        self.run_steps(task, now)
    }

    /// Takes over an executing task whose lease has lapsed. Two callers
    /// claiming the same task race on the version; only one gets to dispatch.
    fn claim_run(&self, task: Task, now: i64) -> Result<Task, CoordinatorError> {
        if let Some(lease_expires_at) = task.lease_expires_at.filter(|until| *until > now) {
            return Err(CoordinatorError::RunInProgress {
                task_id: task.task_id,
                lease_expires_at,
            });
        }
        let mut next = task.clone();
        next.lease_expires_at = Some(self.lease_until(now));
        next.updated_at = now;
        let task = self.store_next(&task, next)?;
        self.log(&task.task_id, now, "decision=run_claimed");
        Ok(task)
    }

    fn run_steps(&self, mut task: Task, now: i64) -> Result<Task, CoordinatorError> {
        let clock = Instant::now();
        loop {
            let Some(plan) = task.plan.clone() else {
                return Err(invalid_transition(&task, "execute without a plan"));
            };
            let Some(step) = plan.current().cloned() else {
                break;
            };
            let index = plan.cursor();
            let input = focus(&step, &task, self.limits);
            let started_at = elapsed_now(now, clock);
            self.log(
                &task.task_id,
                started_at,
                format!("decision=dispatch step={index} kind={}", step.kind),
            );

            let outcome = self.capabilities.invoke(&CapabilityRequest {
                task_id: &task.task_id,
                kind: step.kind,
                focused_input: &input,
                context: &task.history,
            });
            let ended_at = elapsed_now(now, clock);

            let response = match outcome {
                Ok(response) if response.status != StepStatus::Error => response,
                Ok(response) => {
                    let reason = if response.summary.trim().is_empty() {
                        format!("{} capability reported an error", step.kind)
                    } else {
                        response.summary.trim().to_string()
                    };
                    let failed = FailedStep {
                        step,
                        index,
                        payload: response.payload,
                        reason,
                        started_at,
                        ended_at,
                    };
                    return self.fail_step(task, failed);
                }
                Err(err) => {
                    let failed = FailedStep {
                        step,
                        index,
                        payload: Value::Null,
                        reason: err.to_string(),
                        started_at,
                        ended_at,
                    };
                    return self.fail_step(task, failed);
                }
            };

            let result = StepResult {
                step,
                status: response.status,
                payload: response.payload,
                summary: response.summary,
                started_at,
                ended_at,
            };
            self.log(
                &task.task_id,
                ended_at,
                format!(
                    "decision=step_finished step={index} kind={} status={}",
                    result.step.kind, result.status
                ),
            );

            let branch_decision = branch::decide(&result);
            let branched = branch::evaluate(&result, &plan, index);
            if branch_decision != BranchDecision::Continue {
                self.log(
                    &task.task_id,
                    ended_at,
                    format!(
                        "decision=branch outcome={} plan=\"{}\"",
                        branch_decision.as_str(),
                        branched.summary()
                    ),
                );
            }

            let mut next = task.clone();
            if branched != plan {
                next.plan_revision = next.plan_revision.saturating_add(1);
            }
            next.plan = Some(branched.advance());
            next.history.push(result);
            next.lease_expires_at = Some(self.lease_until(ended_at));
            next.updated_at = ended_at;
            task = self.store_next(&task, next)?;
        }

        let finished_at = elapsed_now(now, clock);
        let output = aggregate_output(&task.history);
        let task = self.commit(
            &task,
            TaskState::Completed,
            |next| next.output = Some(output),
            finished_at,
        )?;
        self.log(
            &task.task_id,
            finished_at,
            format!("decision=completed steps={}", task.history.len()),
        );
        Ok(task)
    }

    fn fail_step(&self, task: Task, failed: FailedStep) -> Result<Task, CoordinatorError> {
        let FailedStep {
            step,
            index,
            payload,
            reason,
            started_at,
            ended_at,
        } = failed;
        let kind = step.kind;
        let task = self.commit(
            &task,
            TaskState::Failed,
            |next| {
                if let Some(plan) = next.plan.take() {
                    next.plan = Some(plan.advance());
                }
                next.history.push(StepResult {
                    step,
                    status: StepStatus::Error,
                    payload,
                    summary: reason.clone(),
                    started_at,
                    ended_at,
                });
                next.error = Some(TaskError {
                    kind: TaskErrorKind::CapabilityError,
                    message: reason.clone(),
                    step_index: Some(index),
                });
            },
            ended_at,
        )?;
        self.log(
            &task.task_id,
            ended_at,
            format!("decision=step_failed step={index} kind={kind} transition=failed error={reason}"),
        );
        Err(CoordinatorError::Capability {
            task_id: task.task_id,
            step_index: index,
            kind,
            reason,
        })
    }

    /// Validates the edge, applies `update` to a copy of `current` and stores
    /// it. Terminal states drop the run lease.
    fn commit(
        &self,
        current: &Task,
        next_state: TaskState,
        update: impl FnOnce(&mut Task),
        now: i64,
    ) -> Result<Task, CoordinatorError> {
        if !current.state.can_transition_to(next_state) {
            return Err(invalid_transition(
                current,
                &format!("move to `{next_state}`"),
            ));
        }
        let mut next = current.clone();
        update(&mut next);
        next.state = next_state;
        next.updated_at = now;
        if next_state.is_terminal() {
            next.lease_expires_at = None;
        }
        self.store_next(current, next)
    }

    /// Writes `next` as the successor of `current`: one version later, and
    /// only if the stored task is still `current`.
    fn store_next(&self, current: &Task, mut next: Task) -> Result<Task, CoordinatorError> {
        next.version = current.version.saturating_add(1);
        self.store
            .compare_and_set(&current.task_id, current.state, &next)?;
        Ok(next)
    }

    fn lease_until(&self, now: i64) -> i64 {
        now.saturating_add(self.run_lease_seconds)
    }

    fn log(&self, task_id: &str, now: i64, fields: impl AsRef<str>) {
        if let Some(log) = &self.log {
            let _ = log.record(now, task_id, fields.as_ref());
        }
    }
}

struct FailedStep {
    step: Step,
    index: usize,
    payload: Value,
    reason: String,
    started_at: i64,
    ended_at: i64,
}

fn invalid_transition(task: &Task, action: &str) -> CoordinatorError {
    CoordinatorError::InvalidStateTransition {
        task_id: task.task_id.clone(),
        from: task.state,
        action: action.to_string(),
    }
}

fn lease_seconds(seconds: u64) -> i64 {
    i64::try_from(seconds).unwrap_or(i64::MAX)
}

fn elapsed_now(base_now: i64, started_at: Instant) -> i64 {
    base_now.saturating_add(started_at.elapsed().as_secs() as i64)
}
