//! End-to-end tests for the compute engine queue.
//!
//! These exercise the full stack (coordinator, picker, stores, worker pool)
//! against an in-memory SQLite database.

use std::sync::Arc;
use std::time::Duration;

use prism_ce::clock::IncreasingClock;
use prism_ce::config::QueueConfig;
use prism_ce::node::{EngineState, EngineStatusHolder, NodeInformation, UpgradeStatus};
use prism_ce::queue::{
    QueueCoordinator, QueueLifecycle, QueueStatusCounters, TaskResult, TaskSubmit,
};
use prism_ce::storage::{characteristics, task_types, ActivityStatus, Database, TaskStatus};
use prism_ce::worker::{NoopTaskProcessor, PoolError, WorkerPool, WorkerPoolConfig};

struct Harness {
    db: Database,
    engine: Arc<EngineStatusHolder>,
    coordinator: Arc<QueueCoordinator>,
}

async fn harness(config: QueueConfig) -> Harness {
    let db = Database::connect_in_memory().await.expect("connect");
    db.run_migrations().await.expect("migrate");

    let engine = Arc::new(EngineStatusHolder::new(EngineState::Started));
    let coordinator = Arc::new(QueueCoordinator::new(
        db.clone(),
        &config,
        Arc::new(QueueStatusCounters::new()),
        Arc::clone(&engine),
        NodeInformation::named("it-node"),
        Arc::new(IncreasingClock::default()),
    ));

    Harness {
        db,
        engine,
        coordinator,
    }
}

fn report(component: &str, project: &str) -> TaskSubmit {
    TaskSubmit::new(task_types::REPORT).with_component(component, project)
}

#[tokio::test]
async fn submit_peek_remove_full_cycle() {
    let h = harness(QueueConfig::new()).await;

    let submitted = h
        .coordinator
        .submit(report("branch-1", "project-1").with_submitter("alice"))
        .await
        .expect("submit");

    let task = h
        .coordinator
        .peek("worker-1", true)
        .await
        .expect("peek")
        .expect("claimed");
    assert_eq!(task.uuid, submitted.uuid);

    let result = TaskResult::new().with_analysis_uuid("analysis-1");
    h.coordinator
        .remove(&task, ActivityStatus::Success, Some(&result), None)
        .await
        .expect("remove");

    // queue is empty
    assert!(h
        .coordinator
        .peek("worker-2", true)
        .await
        .expect("peek")
        .is_none());

    // available in history
    let mut session = h.db.session().await.expect("session");
    let history = h
        .coordinator
        .activity_dao()
        .select_by_uuid(&mut session, &task.uuid)
        .await
        .expect("select")
        .expect("present");
    assert_eq!(history.status, ActivityStatus::Success);
    assert!(history.is_last);
    assert_eq!(history.analysis_uuid, Some("analysis-1".to_string()));
    assert_eq!(history.node_name, Some("it-node".to_string()));
    assert_eq!(history.worker_uuid, Some("worker-1".to_string()));
    assert_eq!(history.submitter_login, Some("alice".to_string()));
}

#[tokio::test]
async fn peek_is_oldest_first_across_projects() {
    let h = harness(QueueConfig::new()).await;

    let mut submitted = Vec::new();
    for project in ["p1", "p2", "p3"] {
        let task = h
            .coordinator
            .submit(report(&format!("branch-of-{}", project), project))
            .await
            .expect("submit");
        submitted.push(task.uuid);
    }

    for expected in &submitted {
        let task = h
            .coordinator
            .peek("worker-1", true)
            .await
            .expect("peek")
            .expect("claimed");
        assert_eq!(&task.uuid, expected);
        h.coordinator
            .remove(&task, ActivityStatus::Success, None, None)
            .await
            .expect("remove");
    }

    assert!(h
        .coordinator
        .peek("worker-1", true)
        .await
        .expect("peek")
        .is_none());
}

#[tokio::test]
async fn single_task_per_project_without_parallel_mode() {
    let h = harness(QueueConfig::new()).await;

    h.coordinator
        .submit(report("branch-a", "p1"))
        .await
        .expect("submit");
    h.coordinator
        .submit(report("branch-b", "p1"))
        .await
        .expect("submit");

    assert!(h
        .coordinator
        .peek("worker-1", true)
        .await
        .expect("peek")
        .is_some());
    // the second task of the same project must wait
    assert!(h
        .coordinator
        .peek("worker-2", true)
        .await
        .expect("peek")
        .is_none());
}

#[tokio::test]
async fn pr_and_branch_concurrency_exception() {
    let h = harness(QueueConfig::new().with_parallel_project_tasks(true)).await;

    // PR#1 of project P goes in progress
    let pr1 = h
        .coordinator
        .submit(report("pr-1", "P").with_characteristic(characteristics::PULL_REQUEST, "1"))
        .await
        .expect("submit");
    let claimed = h
        .coordinator
        .peek("worker-1", true)
        .await
        .expect("peek")
        .expect("claimed");
    assert_eq!(claimed.uuid, pr1.uuid);

    // a branch task and PR#2 of the same project wait
    let branch = h
        .coordinator
        .submit(report("branch-b", "P").with_characteristic(characteristics::BRANCH, "b"))
        .await
        .expect("submit");
    let pr2 = h
        .coordinator
        .submit(report("pr-2", "P").with_characteristic(characteristics::PULL_REQUEST, "2"))
        .await
        .expect("submit");
    // a duplicate submission of PR#1 (same PR id) also waits
    h.coordinator
        .submit(report("pr-1", "P").with_characteristic(characteristics::PULL_REQUEST, "1"))
        .await
        .expect("submit");

    // the only in-progress task of P is a PR, so the branch task is eligible
    let second = h
        .coordinator
        .peek("worker-2", true)
        .await
        .expect("peek")
        .expect("claimed");
    assert_eq!(second.uuid, branch.uuid);

    // with a branch now in progress, the next eligible candidate is PR#2
    // (PRs run alongside anything except the same PR)
    let third = h
        .coordinator
        .peek("worker-3", true)
        .await
        .expect("peek")
        .expect("claimed");
    assert_eq!(third.uuid, pr2.uuid);

    // the PR#1 duplicate stays blocked while PR#1 is in progress
    assert!(h
        .coordinator
        .peek("worker-4", true)
        .await
        .expect("peek")
        .is_none());
}

#[tokio::test]
async fn wornout_claim_is_reaped_and_project_unblocked() {
    let h = harness(
        QueueConfig::new()
            .with_wornout_threshold(Duration::from_millis(1))
            .with_parallel_project_tasks(false),
    )
    .await;

    let stale = h
        .coordinator
        .submit(report("branch-a", "p1"))
        .await
        .expect("submit");
    h.coordinator.peek("worker-1", true).await.expect("peek");
    let waiting = h
        .coordinator
        .submit(report("branch-b", "p1"))
        .await
        .expect("submit");

    // the project is blocked by the stale claim
    assert!(h
        .coordinator
        .peek("worker-2", true)
        .await
        .expect("peek")
        .is_none());

    let reaped = h.coordinator.cancel_wornouts().await.expect("wornouts");
    assert_eq!(reaped, 1);

    let mut session = h.db.session().await.expect("session");
    let history = h
        .coordinator
        .activity_dao()
        .select_by_uuid(&mut session, &stale.uuid)
        .await
        .expect("select")
        .expect("present");
    assert_eq!(history.status, ActivityStatus::Canceled);
    drop(session);

    // the project's queue moves again
    let next = h
        .coordinator
        .peek("worker-2", true)
        .await
        .expect("peek")
        .expect("claimed");
    assert_eq!(next.uuid, waiting.uuid);
}

#[tokio::test]
async fn unknown_worker_reconciliation_requeues_claims() {
    let h = harness(QueueConfig::new()).await;

    let task = h
        .coordinator
        .submit(report("branch-a", "p1"))
        .await
        .expect("submit");
    h.coordinator.peek("W1", true).await.expect("peek");

    let reset = h
        .coordinator
        .reset_tasks_with_unknown_worker_uuids(&["W2".to_string()])
        .await
        .expect("reset");
    assert_eq!(reset, 1);

    let mut session = h.db.session().await.expect("session");
    let dto = h
        .coordinator
        .queue_dao()
        .select_by_uuid(&mut session, &task.uuid)
        .await
        .expect("select")
        .expect("present");
    assert_eq!(dto.status, TaskStatus::Pending);
    assert!(dto.worker_uuid.is_none());
}

#[tokio::test]
async fn lifecycle_gates_worker_pool_startup() {
    let h = harness(QueueConfig::new()).await;
    let lifecycle = Arc::new(QueueLifecycle::new(
        Arc::clone(&h.coordinator),
        UpgradeStatus::new(false),
    ));

    let mut pool = WorkerPool::new(
        WorkerPoolConfig::new(1).with_poll_interval(Duration::from_millis(20)),
        Arc::clone(&h.coordinator),
        Arc::clone(&lifecycle),
        Arc::new(NoopTaskProcessor),
    );

    // starting before initialization must fail
    let err = pool.start().await.unwrap_err();
    assert!(matches!(err, PoolError::NotInitialized));

    lifecycle.initialize().await.expect("initialize");
    pool.start().await.expect("start");
    assert!(pool.is_running());
    pool.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn worker_pool_drains_the_queue() {
    let h = harness(QueueConfig::new()).await;
    let lifecycle = Arc::new(QueueLifecycle::new(
        Arc::clone(&h.coordinator),
        UpgradeStatus::new(false),
    ));
    lifecycle.initialize().await.expect("initialize");

    let mut submitted = Vec::new();
    for project in ["p1", "p2", "p3"] {
        let task = h
            .coordinator
            .submit(report(&format!("branch-of-{}", project), project))
            .await
            .expect("submit");
        submitted.push(task.uuid);
    }

    let mut pool = WorkerPool::new(
        WorkerPoolConfig::new(2)
            .with_poll_interval(Duration::from_millis(20))
            .with_shutdown_timeout(Duration::from_secs(5)),
        Arc::clone(&h.coordinator),
        lifecycle,
        Arc::new(NoopTaskProcessor),
    );
    pool.start().await.expect("start");

    // wait for all three tasks to reach the history
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = h.coordinator.counters().snapshot();
        if snapshot.success_count >= 3 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "queue not drained in time: {:?}",
            snapshot
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pool.shutdown().await.expect("shutdown");

    let mut session = h.db.session().await.expect("session");
    for uuid in &submitted {
        let history = h
            .coordinator
            .activity_dao()
            .select_by_uuid(&mut session, uuid)
            .await
            .expect("select")
            .expect("present");
        assert_eq!(history.status, ActivityStatus::Success);
    }
    assert_eq!(
        h.coordinator
            .queue_dao()
            .count_by_status(&mut session, TaskStatus::Pending)
            .await
            .expect("count"),
        0
    );
}

#[tokio::test]
async fn engine_shutdown_stops_task_handout() {
    let h = harness(QueueConfig::new()).await;
    h.coordinator
        .submit(report("branch-a", "p1"))
        .await
        .expect("submit");

    h.engine.set(EngineState::Stopping);
    assert!(h
        .coordinator
        .peek("worker-1", true)
        .await
        .expect("peek")
        .is_none());
}

#[tokio::test]
async fn history_keeps_one_latest_record_per_component() {
    let h = harness(QueueConfig::new()).await;

    let mut last_uuid = String::new();
    for _ in 0..3 {
        let task = h
            .coordinator
            .submit(report("branch-1", "p1"))
            .await
            .expect("submit");
        let claimed = h
            .coordinator
            .peek("worker-1", true)
            .await
            .expect("peek")
            .expect("claimed");
        assert_eq!(claimed.uuid, task.uuid);
        h.coordinator
            .remove(&claimed, ActivityStatus::Success, None, None)
            .await
            .expect("remove");
        last_uuid = task.uuid;
    }

    let mut session = h.db.session().await.expect("session");
    let latest = h
        .coordinator
        .activity_dao()
        .select_by_query(
            &mut session,
            &prism_ce::storage::ActivityQuery::new()
                .with_component_uuid("branch-1")
                .only_last(),
        )
        .await
        .expect("select");
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].uuid, last_uuid);
}
