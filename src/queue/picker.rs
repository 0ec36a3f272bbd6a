//! Next-pending-task selection.
//!
//! Decides, for a given worker, which single queue record (if any) becomes
//! claimable next. Fairness (oldest-first) is the primary invariant; the
//! PR/branch concurrency exception is secondary and never starves the
//! primary queue.

use sqlx::SqliteConnection;
use tracing::info;

use crate::config::QueueConfig;
use crate::storage::{BranchType, DatabaseError, PrOrBranchTask, QueueDao, QueueDto};

/// Selection algorithm for the next claimable task.
#[derive(Debug, Clone)]
pub struct NextPendingTaskPicker {
    queue_dao: QueueDao,
    parallel_project_tasks_enabled: bool,
}

impl NextPendingTaskPicker {
    /// Creates a picker over the given queue store.
    pub fn new(queue_dao: QueueDao, config: &QueueConfig) -> Self {
        Self {
            queue_dao,
            parallel_project_tasks_enabled: config.parallel_project_tasks_enabled,
        }
    }

    /// Finds and claims the next pending task for a worker.
    ///
    /// Tries the standard eligibility query under the caller-selected
    /// priority ordering together with the parallel PR/branch candidate,
    /// claims the older of the two, and falls back to the fully inverted
    /// priority ordering when both come up empty. Returns `None` when
    /// nothing is eligible or every claim lost its race.
    pub async fn find_pending_task(
        &self,
        session: &mut SqliteConnection,
        worker_uuid: &str,
        exclude_indexation_job: bool,
    ) -> Result<Option<QueueDto>, DatabaseError> {
        let standard = self
            .queue_dao
            .select_eligible_for_peek(session, exclude_indexation_job, !exclude_indexation_job)
            .await?;
        let parallel = if self.parallel_project_tasks_enabled {
            self.eligible_for_peek_in_parallel(session).await?
        } else {
            None
        };

        if standard.is_some() || parallel.is_some() {
            return self
                .peek_older_candidate(session, worker_uuid, standard, parallel)
                .await;
        }

        // Last resort: nothing matched the requested ordering, search again
        // with the priorities fully inverted before giving up.
        if let Some(candidate) = self
            .queue_dao
            .select_eligible_for_peek(session, !exclude_indexation_job, exclude_indexation_job)
            .await?
        {
            return self
                .queue_dao
                .try_to_peek(session, &candidate.uuid, worker_uuid)
                .await;
        }

        Ok(None)
    }

    async fn peek_older_candidate(
        &self,
        session: &mut SqliteConnection,
        worker_uuid: &str,
        standard: Option<QueueDto>,
        parallel: Option<PrOrBranchTask>,
    ) -> Result<Option<QueueDto>, DatabaseError> {
        let chosen_uuid = match (&standard, &parallel) {
            (Some(s), Some(p)) => {
                // Ties favor the standard candidate.
                if (p.created_at, p.task_uuid.as_str()) < (s.created_at, s.uuid.as_str()) {
                    log_concurrent_pick(p);
                    p.task_uuid.clone()
                } else {
                    s.uuid.clone()
                }
            }
            (Some(s), None) => s.uuid.clone(),
            (None, Some(p)) => {
                log_concurrent_pick(p);
                p.task_uuid.clone()
            }
            (None, None) => return Ok(None),
        };

        self.queue_dao
            .try_to_peek(session, &chosen_uuid, worker_uuid)
            .await
    }

    /// Finds the oldest queued PR/branch task that may run concurrently with
    /// the tasks currently in progress on its project.
    async fn eligible_for_peek_in_parallel(
        &self,
        session: &mut SqliteConnection,
    ) -> Result<Option<PrOrBranchTask>, DatabaseError> {
        let queued = self
            .queue_dao
            .select_oldest_pending_pr_or_branch(session)
            .await?;
        if queued.is_empty() {
            return Ok(None);
        }

        let in_progress = self
            .queue_dao
            .select_in_progress_with_characteristics(session)
            .await?;

        Ok(queued.into_iter().find(|candidate| {
            match candidate.branch_type {
                BranchType::PullRequest => can_run_pull_request(candidate, &in_progress),
                BranchType::Branch => can_run_branch(candidate, &in_progress),
            }
        }))
    }
}

/// A PR task may run unless the same PR of the same project is already in
/// progress.
fn can_run_pull_request(candidate: &PrOrBranchTask, in_progress: &[PrOrBranchTask]) -> bool {
    !in_progress
        .iter()
        .filter(|task| task.main_component_uuid == candidate.main_component_uuid)
        .filter(|task| task.branch_type == BranchType::PullRequest)
        .any(|task| task.component_uuid == candidate.component_uuid)
}

/// A branch task may run only while every in-progress task of its project is
/// a PR; branches never run concurrently with other branches or with plain
/// analyses.
fn can_run_branch(candidate: &PrOrBranchTask, in_progress: &[PrOrBranchTask]) -> bool {
    in_progress
        .iter()
        .filter(|task| task.main_component_uuid == candidate.main_component_uuid)
        .all(|task| task.branch_type == BranchType::PullRequest)
}

fn log_concurrent_pick(candidate: &PrOrBranchTask) {
    info!(
        task_uuid = %candidate.task_uuid,
        main_component_uuid = ?candidate.main_component_uuid,
        "Task will be run concurrently with other tasks of the same project"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::clock::IncreasingClock;
    use crate::storage::{characteristics, task_types, Database, TaskStatus};

    fn candidate(
        uuid: &str,
        project: &str,
        component: &str,
        branch_type: BranchType,
    ) -> PrOrBranchTask {
        PrOrBranchTask {
            task_uuid: uuid.to_string(),
            main_component_uuid: Some(project.to_string()),
            component_uuid: Some(component.to_string()),
            task_type: task_types::REPORT.to_string(),
            branch_type,
            created_at: 1_000,
        }
    }

    #[test]
    fn test_pr_blocked_by_same_pr_in_progress() {
        let pr = candidate("t1", "p1", "pr-42", BranchType::PullRequest);
        let in_progress = vec![candidate("t0", "p1", "pr-42", BranchType::PullRequest)];
        assert!(!can_run_pull_request(&pr, &in_progress));
    }

    #[test]
    fn test_pr_allowed_with_different_pr_in_progress() {
        let pr = candidate("t1", "p1", "pr-43", BranchType::PullRequest);
        let in_progress = vec![candidate("t0", "p1", "pr-42", BranchType::PullRequest)];
        assert!(can_run_pull_request(&pr, &in_progress));
    }

    #[test]
    fn test_pr_allowed_with_branch_of_same_project_in_progress() {
        let pr = candidate("t1", "p1", "pr-42", BranchType::PullRequest);
        let in_progress = vec![candidate("t0", "p1", "main", BranchType::Branch)];
        assert!(can_run_pull_request(&pr, &in_progress));
    }

    #[test]
    fn test_pr_ignores_other_projects() {
        let pr = candidate("t1", "p1", "pr-42", BranchType::PullRequest);
        let in_progress = vec![candidate("t0", "p2", "pr-42", BranchType::PullRequest)];
        assert!(can_run_pull_request(&pr, &in_progress));
    }

    #[test]
    fn test_branch_allowed_when_only_prs_in_progress() {
        let branch = candidate("t1", "p1", "feature-x", BranchType::Branch);
        let in_progress = vec![
            candidate("t0", "p1", "pr-42", BranchType::PullRequest),
            candidate("t2", "p1", "pr-43", BranchType::PullRequest),
        ];
        assert!(can_run_branch(&branch, &in_progress));
    }

    #[test]
    fn test_branch_blocked_by_branch_in_progress() {
        let branch = candidate("t1", "p1", "feature-x", BranchType::Branch);
        let in_progress = vec![candidate("t0", "p1", "main", BranchType::Branch)];
        assert!(!can_run_branch(&branch, &in_progress));
    }

    #[test]
    fn test_branch_allowed_when_project_idle() {
        let branch = candidate("t1", "p1", "feature-x", BranchType::Branch);
        assert!(can_run_branch(&branch, &[]));
    }

    async fn setup(parallel: bool) -> (Database, QueueDao, NextPendingTaskPicker) {
        let db = Database::connect_in_memory().await.expect("connect");
        db.run_migrations().await.expect("migrate");
        let dao = QueueDao::new(Arc::new(IncreasingClock::default()));
        let config = QueueConfig::new().with_parallel_project_tasks(parallel);
        let picker = NextPendingTaskPicker::new(dao.clone(), &config);
        (db, dao, picker)
    }

    async fn insert_report(db: &Database, dao: &QueueDao, uuid: &str, project: &str) {
        let mut session = db.session().await.expect("session");
        let mut dto = QueueDto::new(uuid, task_types::REPORT)
            .with_component(format!("component-of-{}", uuid), project);
        dao.insert(&mut session, &mut dto).await.expect("insert");
    }

    #[tokio::test]
    async fn test_find_pending_task_claims_oldest() {
        let (db, dao, picker) = setup(false).await;
        insert_report(&db, &dao, "first", "p1").await;
        insert_report(&db, &dao, "second", "p2").await;

        let mut session = db.session().await.expect("session");
        let claimed = picker
            .find_pending_task(&mut session, "w1", true)
            .await
            .expect("find")
            .expect("claimed");
        assert_eq!(claimed.uuid, "first");
        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert_eq!(claimed.worker_uuid, Some("w1".to_string()));
    }

    #[tokio::test]
    async fn test_find_pending_task_empty_queue() {
        let (db, _dao, picker) = setup(false).await;
        let mut session = db.session().await.expect("session");
        let claimed = picker
            .find_pending_task(&mut session, "w1", true)
            .await
            .expect("find");
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn test_fallback_inverts_priorities_for_indexation_job() {
        let (db, dao, picker) = setup(false).await;
        {
            let mut session = db.session().await.expect("session");
            let mut sync = QueueDto::new("sync", task_types::ISSUE_SYNC)
                .with_component("branch-1", "p1");
            dao.insert(&mut session, &mut sync).await.expect("insert");
        }

        // only an indexation job is queued: the first pass excludes it, the
        // inverted fallback picks it up
        let mut session = db.session().await.expect("session");
        let claimed = picker
            .find_pending_task(&mut session, "w1", true)
            .await
            .expect("find")
            .expect("claimed");
        assert_eq!(claimed.uuid, "sync");
    }

    #[tokio::test]
    async fn test_parallel_mode_disabled_blocks_second_pr() {
        let (db, dao, picker) = setup(false).await;
        insert_report(&db, &dao, "pr-1", "p1").await;
        insert_report(&db, &dao, "pr-2", "p1").await;
        {
            let mut session = db.session().await.expect("session");
            for uuid in ["pr-1", "pr-2"] {
                dao.insert_characteristic(
                    &mut session,
                    uuid,
                    characteristics::PULL_REQUEST,
                    uuid,
                )
                .await
                .expect("characteristic");
            }
        }

        let mut session = db.session().await.expect("session");
        let first = picker
            .find_pending_task(&mut session, "w1", true)
            .await
            .expect("find");
        assert_eq!(first.expect("claimed").uuid, "pr-1");

        let second = picker
            .find_pending_task(&mut session, "w2", true)
            .await
            .expect("find");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_parallel_mode_allows_second_pr() {
        let (db, dao, picker) = setup(true).await;
        insert_report(&db, &dao, "pr-1", "p1").await;
        insert_report(&db, &dao, "pr-2", "p1").await;
        {
            let mut session = db.session().await.expect("session");
            for uuid in ["pr-1", "pr-2"] {
                dao.insert_characteristic(
                    &mut session,
                    uuid,
                    characteristics::PULL_REQUEST,
                    uuid,
                )
                .await
                .expect("characteristic");
            }
        }

        let mut session = db.session().await.expect("session");
        let first = picker
            .find_pending_task(&mut session, "w1", true)
            .await
            .expect("find");
        assert_eq!(first.expect("claimed").uuid, "pr-1");

        let second = picker
            .find_pending_task(&mut session, "w2", true)
            .await
            .expect("find");
        assert_eq!(second.expect("claimed").uuid, "pr-2");
    }

    #[tokio::test]
    async fn test_parallel_candidate_never_preempts_older_standard_task() {
        let (db, dao, picker) = setup(true).await;
        // older task on an idle project, younger PR on a busy one
        insert_report(&db, &dao, "older-standard", "p1").await;
        insert_report(&db, &dao, "busy", "p2").await;
        insert_report(&db, &dao, "younger-pr", "p2").await;
        {
            let mut session = db.session().await.expect("session");
            dao.insert_characteristic(
                &mut session,
                "younger-pr",
                characteristics::PULL_REQUEST,
                "42",
            )
            .await
            .expect("characteristic");
            dao.try_to_peek(&mut session, "busy", "w0")
                .await
                .expect("peek");
        }

        let mut session = db.session().await.expect("session");
        let claimed = picker
            .find_pending_task(&mut session, "w1", true)
            .await
            .expect("find")
            .expect("claimed");
        assert_eq!(claimed.uuid, "older-standard");
    }
}
