use opspilot::capability::{
    capability_fn, Capability, CapabilityError, CapabilityResponse, CapabilitySet,
};
use opspilot::coordination::{
    CapabilityKind, Coordinator, CoordinatorError, FileTaskStore, PlanBuilder, StepResult,
    StepStatus, Task, TaskErrorKind, TaskState, TaskStore,
};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use tempfile::tempdir;

const REQUEST: &str = "Diagnose why the checkout service is returning 502 errors, write a script to restart the failing pods, and email the on-call team a summary.";

type Calls = Arc<Mutex<Vec<(CapabilityKind, String)>>>;

fn recording(calls: &Calls, response: CapabilityResponse) -> impl Capability + 'static {
    let calls = Arc::clone(calls);
    capability_fn(move |request| {
        calls
            .lock()
            .expect("calls lock")
            .push((request.kind, request.focused_input.to_string()));
        Ok(response.clone())
    })
}

fn healthy_diagnosis() -> CapabilityResponse {
    CapabilityResponse::success("Root cause: two pods are OOM-killed after the 14:00 deploy.")
}

fn restart_script() -> CapabilityResponse {
    CapabilityResponse::success("kubectl rollout restart deployment/checkout")
}

fn team_email() -> CapabilityResponse {
    CapabilityResponse::success("Hi on-call, checkout 502s were caused by OOM-killed pods.")
}

fn coordinator_with(
    root: &Path,
    calls: &Calls,
    diagnosis: CapabilityResponse,
) -> Coordinator<FileTaskStore> {
    let capabilities = CapabilitySet::new(
        recording(calls, diagnosis),
        recording(calls, restart_script()),
        recording(calls, team_email()),
    );
    Coordinator::new(FileTaskStore::new(root), capabilities)
}

fn called_kinds(calls: &Calls) -> Vec<CapabilityKind> {
    calls
        .lock()
        .expect("calls lock")
        .iter()
        .map(|(kind, _)| *kind)
        .collect()
}

fn writing_input(calls: &Calls) -> String {
    calls
        .lock()
        .expect("calls lock")
        .iter()
        .find(|(kind, _)| *kind == CapabilityKind::Writing)
        .map(|(_, input)| input.clone())
        .expect("writing was invoked")
}

#[test]
fn submit_without_approval_runs_every_step_and_completes() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());

    let task = coordinator.submit(REQUEST, false, 100).expect("submit");

    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.history.len(), 3);
    assert!(task
        .history
        .iter()
        .all(|result| result.status == StepStatus::Success));
    assert_eq!(
        task.output.as_deref(),
        Some("Hi on-call, checkout 502s were caused by OOM-killed pods.")
    );
    assert_eq!(task.plan.as_ref().map(|plan| plan.cursor()), Some(3));
    assert_eq!(
        called_kinds(&calls),
        vec![
            CapabilityKind::Diagnosis,
            CapabilityKind::Automation,
            CapabilityKind::Writing
        ]
    );

    let input = writing_input(&calls);
    assert!(input.starts_with("email the on-call team a summary"));
    assert!(input.contains("--- prior result 1: diagnosis (success) ---"));
    assert!(input.contains("two pods are OOM-killed"));
    assert!(input.contains("--- prior result 2: automation (success) ---"));

    let stored = coordinator.status(&task.task_id).expect("status");
    assert_eq!(stored, task);
}

#[test]
fn approval_gate_parks_the_task_until_approved() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());

    let parked = coordinator.submit(REQUEST, true, 100).expect("submit");
    assert_eq!(parked.state, TaskState::AwaitingApproval);
    assert!(parked.history.is_empty());
    assert!(parked.output.is_none());
    assert!(called_kinds(&calls).is_empty());
    assert_eq!(parked.plan.as_ref().map(|plan| plan.len()), Some(3));

    let done = coordinator.approve(&parked.task_id, 200).expect("approve");
    assert_eq!(done.state, TaskState::Completed);
    assert_eq!(done.history.len(), 3);
    assert!(done.output.is_some());
}

#[test]
fn reject_ends_the_task_without_running_any_step() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());

    let parked = coordinator.submit(REQUEST, true, 100).expect("submit");
    let rejected = coordinator.reject(&parked.task_id, 150).expect("reject");

    assert_eq!(rejected.state, TaskState::Rejected);
    assert!(rejected.history.is_empty());
    assert!(rejected.output.is_none());
    assert!(called_kinds(&calls).is_empty());

    let err = coordinator
        .approve(&parked.task_id, 160)
        .expect_err("rejected task cannot be approved");
    assert!(matches!(
        err,
        CoordinatorError::InvalidStateTransition {
            from: TaskState::Rejected,
            ..
        }
    ));
    assert_eq!(
        coordinator.status(&parked.task_id).expect("status"),
        rejected
    );
}

#[test]
fn second_approve_is_rejected_without_changing_the_task() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());

    let parked = coordinator.submit(REQUEST, true, 100).expect("submit");
    let done = coordinator.approve(&parked.task_id, 200).expect("approve");

    let err = coordinator
        .approve(&parked.task_id, 300)
        .expect_err("second approve");
    assert!(matches!(
        err,
        CoordinatorError::InvalidStateTransition {
            from: TaskState::Completed,
            ..
        }
    ));
    assert_eq!(coordinator.status(&parked.task_id).expect("status"), done);
    assert_eq!(called_kinds(&calls).len(), 3);
}

#[test]
fn reject_outside_the_gate_is_an_invalid_transition() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());

    let done = coordinator.submit(REQUEST, false, 100).expect("submit");
    let err = coordinator
        .reject(&done.task_id, 200)
        .expect_err("reject completed task");
    assert!(matches!(err, CoordinatorError::InvalidStateTransition { .. }));
}

#[test]
fn no_problem_diagnosis_skips_automation_and_reports_it() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(
        temp.path(),
        &calls,
        CapabilityResponse::with_status(
            StepStatus::NoProblemIdentified,
            "All checkout pods healthy; 502s not reproducible.",
        ),
    );

    let task = coordinator.submit(REQUEST, false, 100).expect("submit");

    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(
        called_kinds(&calls),
        vec![CapabilityKind::Diagnosis, CapabilityKind::Writing]
    );
    assert_eq!(task.history.len(), 2);
    assert_eq!(task.history[1].step.kind, CapabilityKind::Writing);
    assert_eq!(task.plan_revision, 2);
    let input = writing_input(&calls);
    assert!(input.contains("no actionable problem found"));
    assert!(input.contains("All checkout pods healthy"));
}

#[test]
fn low_confidence_diagnosis_reports_an_inconclusive_result() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(
        temp.path(),
        &calls,
        CapabilityResponse::with_status(StepStatus::LowConfidence, "Possibly a bad node."),
    );

    let task = coordinator.submit(REQUEST, false, 100).expect("submit");

    assert_eq!(task.state, TaskState::Completed);
    assert!(!called_kinds(&calls).contains(&CapabilityKind::Automation));
    let input = writing_input(&calls);
    assert!(input.contains("inconclusive"));
    assert!(input.contains("low-confidence"));
    assert_eq!(
        task.output.as_deref(),
        Some("Hi on-call, checkout 502s were caused by OOM-killed pods.")
    );
}

#[test]
fn capability_error_fails_the_task_and_keeps_partial_history() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let capabilities = CapabilitySet::new(
        recording(&calls, healthy_diagnosis()),
        capability_fn(|request| {
            Err(CapabilityError::Failed {
                kind: request.kind,
                message: "kubectl: connection refused".to_string(),
            })
        }),
        recording(&calls, team_email()),
    );
    let coordinator = Coordinator::new(FileTaskStore::new(temp.path()), capabilities);

    let err = coordinator
        .submit(REQUEST, false, 100)
        .expect_err("automation fails");
    let task_id = match err {
        CoordinatorError::Capability {
            task_id,
            step_index,
            kind,
            reason,
        } => {
            assert_eq!(step_index, 1);
            assert_eq!(kind, CapabilityKind::Automation);
            assert!(reason.contains("connection refused"));
            task_id
        }
        other => panic!("unexpected error: {other:?}"),
    };

    let task = coordinator.status(&task_id).expect("status");
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.history.len(), 2);
    assert_eq!(task.history[0].status, StepStatus::Success);
    assert_eq!(task.history[1].status, StepStatus::Error);
    let error = task.error.expect("error record");
    assert_eq!(error.kind, TaskErrorKind::CapabilityError);
    assert_eq!(error.step_index, Some(1));
    assert!(task.output.is_none());
    assert_eq!(called_kinds(&calls), vec![CapabilityKind::Diagnosis]);
}

#[test]
fn error_status_from_a_capability_also_fails_the_task() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(
        temp.path(),
        &calls,
        CapabilityResponse::with_status(StepStatus::Error, "metrics backend unreachable"),
    );

    let err = coordinator
        .submit(REQUEST, false, 100)
        .expect_err("diagnosis reports error");
    assert!(matches!(
        err,
        CoordinatorError::Capability { step_index: 0, .. }
    ));
    assert_eq!(called_kinds(&calls), vec![CapabilityKind::Diagnosis]);
}

#[test]
fn panicking_capability_is_contained_as_a_failure() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let capabilities = CapabilitySet::new(
        capability_fn(|_| panic!("diagnosis agent crashed")),
        recording(&calls, restart_script()),
        recording(&calls, team_email()),
    );
    let coordinator = Coordinator::new(FileTaskStore::new(temp.path()), capabilities);

    let err = coordinator
        .submit(REQUEST, false, 100)
        .expect_err("panic becomes failure");
    let CoordinatorError::Capability {
        task_id, reason, ..
    } = err
    else {
        panic!("unexpected error: {err:?}");
    };
    assert!(reason.contains("diagnosis agent crashed"));
    let task = coordinator.status(&task_id).expect("status");
    assert_eq!(task.state, TaskState::Failed);
}

#[test]
fn unplannable_request_is_stored_as_failed() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());

    let err = coordinator
        .submit("hello there", false, 100)
        .expect_err("nothing to plan");
    let CoordinatorError::UnplannableRequest { task_id, .. } = err else {
        panic!("unexpected error: {err:?}");
    };

    let task = coordinator.status(&task_id).expect("status");
    assert_eq!(task.state, TaskState::Failed);
    assert!(task.plan.is_none());
    assert_eq!(
        task.error.map(|error| error.kind),
        Some(TaskErrorKind::UnplannableRequest)
    );
    assert!(called_kinds(&calls).is_empty());
}

#[test]
fn status_is_read_only() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());

    let parked = coordinator.submit(REQUEST, true, 100).expect("submit");
    let path = coordinator
        .store()
        .task_path(&parked.task_id)
        .expect("task path");
    let before = fs::read_to_string(&path).expect("read snapshot");

    let first = coordinator.status(&parked.task_id).expect("status");
    let second = coordinator.status(&parked.task_id).expect("status");

    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&path).expect("read snapshot"), before);
    assert!(matches!(
        coordinator.status("task-missing"),
        Err(CoordinatorError::UnknownTask { .. })
    ));
}

#[test]
fn concurrent_approvals_have_exactly_one_winner() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = Arc::new(coordinator_with(temp.path(), &calls, healthy_diagnosis()));

    let parked = coordinator.submit(REQUEST, true, 100).expect("submit");
    let handles = (0..2)
        .map(|offset| {
            let coordinator = Arc::clone(&coordinator);
            let task_id = parked.task_id.clone();
            thread::spawn(move || coordinator.approve(&task_id, 200 + offset))
        })
        .collect::<Vec<_>>();
    let outcomes = handles
        .into_iter()
        .map(|handle| handle.join().expect("join approver"))
        .collect::<Vec<_>>();

    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(winners, 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(matches!(
                err,
                CoordinatorError::StorageConflict { .. }
                    | CoordinatorError::InvalidStateTransition { .. }
            ));
        }
    }
    assert_eq!(called_kinds(&calls).len(), 3);
    assert_eq!(
        coordinator.status(&parked.task_id).expect("status").state,
        TaskState::Completed
    );
}

#[test]
fn resume_continues_a_task_left_in_planned() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());

    let mut task = Task::received("task-crashed", REQUEST, false, 50);
    task.state = TaskState::Planned;
    task.plan = Some(PlanBuilder::new().build(REQUEST).expect("plan"));
    task.plan_revision = 1;
    coordinator.store().create(&task).expect("seed task");

    let resumed = coordinator.resume("task-crashed", 60).expect("resume");
    assert_eq!(resumed.state, TaskState::Completed);
    assert_eq!(resumed.history.len(), 3);
}

#[test]
fn resume_refuses_parked_and_terminal_tasks() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());

    let parked = coordinator.submit(REQUEST, true, 100).expect("submit");
    assert!(matches!(
        coordinator.resume(&parked.task_id, 110),
        Err(CoordinatorError::InvalidStateTransition {
            from: TaskState::AwaitingApproval,
            ..
        })
    ));

    coordinator.approve(&parked.task_id, 120).expect("approve");
    assert!(matches!(
        coordinator.resume(&parked.task_id, 130),
        Err(CoordinatorError::InvalidStateTransition {
            from: TaskState::Completed,
            ..
        })
    ));
}

/// An executing task whose first step already finished, as left behind by a
/// run that died before dispatching the second step.
fn seed_mid_plan(
    coordinator: &Coordinator<FileTaskStore>,
    task_id: &str,
    lease: Option<i64>,
) -> Task {
    let plan = PlanBuilder::new().build(REQUEST).expect("plan");
    let mut task = Task::received(task_id, REQUEST, false, 40);
    task.state = TaskState::Executing;
    task.plan_revision = 1;
    task.history.push(StepResult {
        step: plan.steps()[0].clone(),
        status: StepStatus::Success,
        payload: Value::Null,
        summary: "Root cause: the checkout pods hit their memory limit.".to_string(),
        started_at: 41,
        ended_at: 42,
    });
    task.plan = Some(plan.advance());
    task.lease_expires_at = lease;
    task.updated_at = 42;
    coordinator.store().create(&task).expect("seed task");
    task
}

#[test]
fn resume_from_executing_runs_only_the_remaining_steps() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());
    let seeded = seed_mid_plan(&coordinator, "task-midway", Some(55));

    let resumed = coordinator.resume("task-midway", 60).expect("resume");

    assert_eq!(resumed.state, TaskState::Completed);
    assert_eq!(
        called_kinds(&calls),
        vec![CapabilityKind::Automation, CapabilityKind::Writing]
    );
    assert_eq!(resumed.history.len(), 3);
    assert_eq!(resumed.history[0], seeded.history[0]);
    assert_eq!(resumed.history[1].step.kind, CapabilityKind::Automation);
    assert_eq!(resumed.history[2].step.kind, CapabilityKind::Writing);
    assert_eq!(resumed.plan.as_ref().map(|plan| plan.cursor()), Some(3));
    assert!(writing_input(&calls).contains("the checkout pods hit their memory limit"));
    assert!(resumed.lease_expires_at.is_none());
    assert!(resumed.version > seeded.version);
    assert_eq!(coordinator.status("task-midway").expect("status"), resumed);
}

#[test]
fn resume_refuses_an_executing_task_with_a_live_lease() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());
    let seeded = seed_mid_plan(&coordinator, "task-leased", Some(500));

    let err = coordinator
        .resume("task-leased", 60)
        .expect_err("lease still held");
    assert!(matches!(
        err,
        CoordinatorError::RunInProgress {
            lease_expires_at: 500,
            ..
        }
    ));
    assert!(called_kinds(&calls).is_empty());
    assert_eq!(coordinator.status("task-leased").expect("status"), seeded);

    let resumed = coordinator.resume("task-leased", 501).expect("lease lapsed");
    assert_eq!(resumed.state, TaskState::Completed);
}

#[test]
fn concurrent_resumes_dispatch_each_step_once() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = Arc::new(coordinator_with(temp.path(), &calls, healthy_diagnosis()));

    let mut task = Task::received("task-orphaned", REQUEST, false, 40);
    task.state = TaskState::Executing;
    task.plan = Some(PlanBuilder::new().build(REQUEST).expect("plan"));
    task.plan_revision = 1;
    coordinator.store().create(&task).expect("seed task");

    let barrier = Arc::new(Barrier::new(2));
    let handles = (0..2)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                coordinator.resume("task-orphaned", 60)
            })
        })
        .collect::<Vec<_>>();
    let outcomes = handles
        .into_iter()
        .map(|handle| handle.join().expect("join resumer"))
        .collect::<Vec<_>>();

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(
                    err,
                    CoordinatorError::StorageConflict { .. }
                        | CoordinatorError::RunInProgress { .. }
                        | CoordinatorError::InvalidStateTransition {
                            from: TaskState::Completed,
                            ..
                        }
                ),
                "unexpected error: {err}"
            );
        }
    }
    assert_eq!(
        called_kinds(&calls),
        vec![
            CapabilityKind::Diagnosis,
            CapabilityKind::Automation,
            CapabilityKind::Writing
        ]
    );
    let stored = coordinator.status("task-orphaned").expect("status");
    assert_eq!(stored.state, TaskState::Completed);
    assert_eq!(stored.history.len(), 3);
}

#[test]
fn resume_plans_and_runs_a_task_left_in_received() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator = coordinator_with(temp.path(), &calls, healthy_diagnosis());
    let task = Task::received("task-unplanned", REQUEST, false, 50);
    coordinator.store().create(&task).expect("seed task");

    let resumed = coordinator.resume("task-unplanned", 60).expect("resume");

    assert_eq!(resumed.state, TaskState::Completed);
    assert_eq!(resumed.plan_revision, 1);
    assert_eq!(resumed.history.len(), 3);
    assert_eq!(called_kinds(&calls).len(), 3);
}

#[test]
fn unwritable_log_does_not_strand_the_task() {
    let temp = tempdir().expect("tempdir");
    let blocker = temp.path().join("not-a-directory");
    fs::write(&blocker, "occupied").expect("write blocker file");
    let calls = Calls::default();
    let coordinator = Coordinator::new(
        FileTaskStore::new(temp.path().join("state")),
        CapabilitySet::new(
            recording(&calls, healthy_diagnosis()),
            recording(&calls, restart_script()),
            recording(&calls, team_email()),
        ),
    )
    .with_log_root(&blocker);

    let task = coordinator.submit(REQUEST, false, 100).expect("submit");
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(
        coordinator.status(&task.task_id).expect("status").state,
        TaskState::Completed
    );

    let parked = coordinator.submit(REQUEST, true, 110).expect("submit gated");
    let done = coordinator.approve(&parked.task_id, 120).expect("approve");
    assert_eq!(done.state, TaskState::Completed);
    assert!(!blocker.join("logs").exists());
}

#[test]
fn coordinator_writes_decision_lines_to_the_log() {
    let temp = tempdir().expect("tempdir");
    let calls = Calls::default();
    let coordinator =
        coordinator_with(temp.path(), &calls, healthy_diagnosis()).with_log_root(temp.path());

    let parked = coordinator.submit(REQUEST, true, 100).expect("submit");
    coordinator.reject(&parked.task_id, 110).expect("reject");

    let log = fs::read_to_string(temp.path().join("logs/coordinator.log")).expect("read log");
    assert!(log.contains(&format!("ts=100 task_id={} decision=received", parked.task_id)));
    assert!(log.contains("decision=planned plan=\"diagnosis -> automation -> writing\""));
    assert!(log.contains("decision=awaiting_approval"));
    assert!(log.contains(&format!("ts=110 task_id={} decision=rejected", parked.task_id)));
}
