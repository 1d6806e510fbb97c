use opspilot::capability::{capability_fn, CapabilityResponse, CapabilitySet};
use opspilot::coordination::sqlite_store::TASKS_DB_FILE_NAME;
use opspilot::coordination::{
    Coordinator, CoordinatorError, SqliteTaskStore, Task, TaskState, TaskStore,
};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

fn sample_task(task_id: &str) -> Task {
    Task::received(task_id, "Check why the nightly export stalls", true, 10)
}

#[test]
fn open_creates_the_database_under_the_state_root() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path().join("state");
    let store = SqliteTaskStore::open_in_state_root(&root).expect("open");

    assert_eq!(store.db_path(), root.join(TASKS_DB_FILE_NAME).as_path());
    assert!(store.db_path().is_file());
    SqliteTaskStore::open(store.db_path()).expect("reopen existing schema");
}

#[test]
fn create_get_and_duplicate_ids() {
    let temp = tempdir().expect("tempdir");
    let store = SqliteTaskStore::open_in_state_root(temp.path()).expect("open");
    let task = sample_task("task-s1");

    assert_eq!(store.create(&task).expect("create"), "task-s1");
    assert_eq!(store.get("task-s1").expect("get"), task);
    assert!(matches!(
        store.create(&task),
        Err(CoordinatorError::TaskExists { .. })
    ));
    assert!(matches!(
        store.get("task-missing"),
        Err(CoordinatorError::UnknownTask { .. })
    ));
}

#[test]
fn compare_and_set_checks_the_stored_state() {
    let temp = tempdir().expect("tempdir");
    let store = SqliteTaskStore::open_in_state_root(temp.path()).expect("open");
    let task = sample_task("task-s2");
    store.create(&task).expect("create");

    let mut planned = task.clone();
    planned.state = TaskState::Planned;
    planned.version = task.version + 1;
    planned.updated_at = 20;
    store
        .compare_and_set("task-s2", TaskState::Received, &planned)
        .expect("update");

    let mut stale = task.clone();
    stale.state = TaskState::Failed;
    stale.version = task.version + 1;
    assert!(matches!(
        store.compare_and_set("task-s2", TaskState::Received, &stale),
        Err(CoordinatorError::StorageConflict { .. })
    ));
    let mut same_state_behind = planned.clone();
    same_state_behind.updated_at = 25;
    assert!(matches!(
        store.compare_and_set("task-s2", TaskState::Planned, &same_state_behind),
        Err(CoordinatorError::StorageConflict { .. })
    ));
    assert!(matches!(
        store.compare_and_set("task-none", TaskState::Received, &sample_task("task-none")),
        Err(CoordinatorError::UnknownTask { .. })
    ));
    assert_eq!(store.get("task-s2").expect("get"), planned);
}

#[test]
fn racing_compare_and_set_has_one_winner() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(SqliteTaskStore::open_in_state_root(temp.path()).expect("open"));
    let task = sample_task("task-s3");
    store.create(&task).expect("create");

    let barrier = Arc::new(Barrier::new(4));
    let handles = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let mut next = task.clone();
            next.state = TaskState::AwaitingApproval;
            next.version = task.version + 1;
            thread::spawn(move || {
                barrier.wait();
                store.compare_and_set("task-s3", TaskState::Received, &next)
            })
        })
        .collect::<Vec<_>>();

    let winners = handles
        .into_iter()
        .map(|handle| handle.join().expect("join worker"))
        .filter(|outcome| outcome.is_ok())
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn coordinator_runs_against_the_sqlite_store() {
    let temp = tempdir().expect("tempdir");
    let store = SqliteTaskStore::open_in_state_root(temp.path()).expect("open");
    let capabilities = CapabilitySet::new(
        capability_fn(|_| Ok(CapabilityResponse::success("export blocked on a table lock"))),
        capability_fn(|_| Ok(CapabilityResponse::success("restarted stuck session 4412"))),
        capability_fn(|_| Ok(CapabilityResponse::success("unused"))),
    );
    let coordinator = Coordinator::new(store, capabilities);

    let parked = coordinator
        .submit(
            "Check why the nightly export stalls and restart the stuck session",
            true,
            10,
        )
        .expect("submit");
    assert_eq!(parked.state, TaskState::AwaitingApproval);

    let done = coordinator.approve(&parked.task_id, 20).expect("approve");
    assert_eq!(done.state, TaskState::Completed);
    assert_eq!(done.history.len(), 2);
    assert_eq!(
        coordinator.status(&parked.task_id).expect("status"),
        done
    );
}
