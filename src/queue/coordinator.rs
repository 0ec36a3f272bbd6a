//! Queue coordination.
//!
//! The mutable orchestration layer composing the picker and the record
//! stores into atomic state transitions. Each operation opens its own
//! transaction, performs one committed batch of changes and releases the
//! session; correctness under concurrent workers relies on the store's
//! conditional claim update, not on in-process locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::node::{EngineState, EngineStatusHolder, NodeInformation};
use crate::storage::{
    ActivityDao, ActivityDto, ActivityStatus, Database, DatabaseError, QueueDao, QueueDto,
    TaskStatus,
};

use super::counters::QueueStatusCounters;
use super::picker::NextPendingTaskPicker;
use super::task::{Task, TaskError, TaskResult, TaskSubmit};

/// Errors surfaced by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A precondition on the arguments was violated; nothing was mutated.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The queue state contradicts the requested transition.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The backing store failed; the caller retries on its next cycle.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Pause state of the worker fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkersPauseStatus {
    /// Workers may claim tasks.
    Resumed,
    /// Workers are administratively paused; `peek` returns nothing.
    Paused,
}

/// The queue coordinator.
pub struct QueueCoordinator {
    db: Database,
    queue_dao: QueueDao,
    activity_dao: ActivityDao,
    picker: NextPendingTaskPicker,
    counters: Arc<QueueStatusCounters>,
    clock: Arc<dyn Clock>,
    engine_status: Arc<EngineStatusHolder>,
    node: NodeInformation,
    wornout_threshold_ms: i64,
    paused: AtomicBool,
}

impl QueueCoordinator {
    /// Creates a coordinator over the given database.
    pub fn new(
        db: Database,
        config: &QueueConfig,
        counters: Arc<QueueStatusCounters>,
        engine_status: Arc<EngineStatusHolder>,
        node: NodeInformation,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue_dao = QueueDao::new(Arc::clone(&clock));
        let picker = NextPendingTaskPicker::new(queue_dao.clone(), config);
        Self {
            db,
            queue_dao,
            activity_dao: ActivityDao::new(),
            picker,
            counters,
            clock,
            engine_status,
            node,
            wornout_threshold_ms: config.wornout_threshold.as_millis() as i64,
            paused: AtomicBool::new(false),
        }
    }

    /// Returns the counters this coordinator reports into.
    pub fn counters(&self) -> &Arc<QueueStatusCounters> {
        &self.counters
    }

    /// Returns the queue record store.
    pub fn queue_dao(&self) -> &QueueDao {
        &self.queue_dao
    }

    /// Returns the activity record store.
    pub fn activity_dao(&self) -> &ActivityDao {
        &self.activity_dao
    }

    /// Returns the database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Enqueues a new task and returns its descriptor.
    pub async fn submit(&self, submit: TaskSubmit) -> Result<Task, QueueError> {
        if submit.task_type.is_empty() {
            return Err(QueueError::InvalidArgument(
                "task_type can't be empty".to_string(),
            ));
        }

        let uuid = Uuid::new_v4().to_string();
        let mut dto = QueueDto::new(&uuid, &submit.task_type);
        dto.component_uuid = submit.component_uuid.clone();
        dto.main_component_uuid = submit.main_component_uuid.clone();
        dto.submitter_login = submit.submitter_login.clone();

        let mut tx = self.db.begin().await?;
        self.queue_dao.insert(&mut tx, &mut dto).await?;
        for (key, value) in &submit.characteristics {
            self.queue_dao
                .insert_characteristic(&mut tx, &uuid, key, value)
                .await?;
        }
        if let Some(ref input) = submit.input {
            self.queue_dao
                .insert_task_input(&mut tx, &uuid, input)
                .await?;
        }
        tx.commit().await.map_err(DatabaseError::from)?;

        info!(task_uuid = %uuid, task_type = %submit.task_type, "Task submitted");

        Ok(Task {
            uuid,
            task_type: submit.task_type,
            component_uuid: submit.component_uuid,
            main_component_uuid: submit.main_component_uuid,
            submitter_login: submit.submitter_login,
            characteristics: submit.characteristics,
        })
    }

    /// Claims the next eligible task for a worker.
    ///
    /// Returns nothing when the engine is not started or workers are paused
    /// (checked before any storage access). Before picking, any record this
    /// worker left in progress from a previous, possibly crashed attempt is
    /// returned to pending, so a worker never starves behind its own
    /// orphaned claim.
    pub async fn peek(
        &self,
        worker_uuid: &str,
        exclude_indexation_job: bool,
    ) -> Result<Option<Task>, QueueError> {
        if worker_uuid.is_empty() {
            return Err(QueueError::InvalidArgument(
                "worker_uuid can't be empty".to_string(),
            ));
        }
        if self.engine_status.get() != EngineState::Started
            || self.workers_pause_status() == WorkersPauseStatus::Paused
        {
            return Ok(None);
        }

        let mut tx = self.db.begin().await?;

        let stale = self
            .queue_dao
            .select_not_pending_for_worker(&mut tx, worker_uuid)
            .await?;
        for dto in &stale {
            self.queue_dao
                .reset_to_pending_by_uuid(&mut tx, &dto.uuid)
                .await?;
        }
        if !stale.is_empty() {
            warn!(
                worker_uuid = %worker_uuid,
                count = stale.len(),
                "Reset in-progress tasks of restarted worker to pending"
            );
        }

        let picked = self
            .picker
            .find_pending_task(&mut tx, worker_uuid, exclude_indexation_job)
            .await?;

        let task = match picked {
            Some(dto) => {
                let characteristics = self
                    .queue_dao
                    .select_characteristics(&mut tx, &dto.uuid)
                    .await?;
                Some(task_from_dto(dto, characteristics))
            }
            None => None,
        };

        tx.commit().await.map_err(DatabaseError::from)?;

        if let Some(ref task) = task {
            self.counters.add_in_progress();
            info!(task_uuid = %task.uuid, worker_uuid = %worker_uuid, "Task claimed");
        }

        Ok(task)
    }

    /// Moves a claimed task to the activity history with a terminal status.
    ///
    /// The queue record is deleted and the activity record inserted in one
    /// transaction. The monitoring counters are updated on every exit path,
    /// including the illegal-state one, so they stay live regardless of the
    /// persistence outcome.
    pub async fn remove(
        &self,
        task: &Task,
        status: ActivityStatus,
        result: Option<&TaskResult>,
        error: Option<&TaskError>,
    ) -> Result<(), QueueError> {
        if error.is_some() && status != ActivityStatus::Failed {
            return Err(QueueError::InvalidArgument(
                "Error can be provided only when status is FAILED".to_string(),
            ));
        }

        let outcome = self.remove_impl(task, status, result, error).await;

        let execution_time_ms = *outcome.as_ref().unwrap_or(&0);
        match status {
            ActivityStatus::Success => self.counters.add_success(execution_time_ms),
            _ => self.counters.add_error(execution_time_ms),
        }

        outcome.map(|_| ())
    }

    async fn remove_impl(
        &self,
        task: &Task,
        status: ActivityStatus,
        result: Option<&TaskResult>,
        error: Option<&TaskError>,
    ) -> Result<i64, QueueError> {
        let mut tx = self.db.begin().await?;

        let queue_dto = self
            .queue_dao
            .select_by_uuid(&mut tx, &task.uuid)
            .await?
            .ok_or_else(|| {
                QueueError::IllegalState(format!("Task does not exist anymore: {}", task.uuid))
            })?;

        let mut activity = ActivityDto::from_queue(&queue_dto, status);
        activity.node_name = self.node.node_name().map(str::to_string);

        let execution_time_ms = match queue_dto.started_at {
            Some(started_at) => {
                let now = self.clock.now_ms();
                activity.executed_at = Some(now);
                activity.execution_time_ms = Some(now - started_at);
                now - started_at
            }
            None => 0,
        };

        if let Some(result) = result {
            activity.analysis_uuid = result.analysis_uuid.clone();
        }
        if let Some(error) = error {
            activity.error_message = Some(error.message().to_string());
            activity.error_type = error.kind().map(str::to_string);
            activity.error_stacktrace = error.stacktrace().map(str::to_string);
        }

        self.finish(&mut tx, &queue_dto, &activity).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        info!(task_uuid = %task.uuid, status = %status, "Task removed from queue");

        Ok(execution_time_ms)
    }

    /// Cancels one pending task.
    ///
    /// A task already claimed by a worker cannot be cancelled; it either
    /// completes, or its claim wears out and `cancel_wornouts` reaps it.
    pub async fn cancel(&self, queue_dto: &QueueDto) -> Result<(), QueueError> {
        if queue_dto.status == TaskStatus::InProgress {
            return Err(QueueError::IllegalState(format!(
                "Task is in progress and can't be canceled: {}",
                queue_dto.uuid
            )));
        }

        let mut tx = self.db.begin().await?;
        self.cancel_impl(&mut tx, queue_dto).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(())
    }

    /// Cancels every queued task; returns the number of cancelled tasks.
    ///
    /// In-progress tasks are only included when `include_in_progress` is
    /// set (the upgrade path, where no worker can still be executing them).
    pub async fn cancel_all(&self, include_in_progress: bool) -> Result<usize, QueueError> {
        let mut tx = self.db.begin().await?;

        let all = self.queue_dao.select_all(&mut tx).await?;
        let mut cancelled = 0;
        for dto in &all {
            if dto.status == TaskStatus::InProgress && !include_in_progress {
                continue;
            }
            self.cancel_impl(&mut tx, dto).await?;
            cancelled += 1;
        }

        tx.commit().await.map_err(DatabaseError::from)?;

        if cancelled > 0 {
            info!(count = cancelled, "Cancelled queued tasks");
        }

        Ok(cancelled)
    }

    /// Cancels every task whose claim outlived the staleness threshold.
    ///
    /// This is the mechanism that prevents a crashed worker's claim from
    /// blocking its project's queue forever. Does not touch the monitoring
    /// counters: the worker that held the claim is presumed dead and never
    /// reported a terminal transition for them.
    pub async fn cancel_wornouts(&self) -> Result<usize, QueueError> {
        let cutoff = self.clock.now_ms() - self.wornout_threshold_ms;
        let mut tx = self.db.begin().await?;

        let wornouts = self.queue_dao.select_wornout(&mut tx, cutoff).await?;
        for dto in &wornouts {
            self.cancel_impl(&mut tx, dto).await?;
        }

        tx.commit().await.map_err(DatabaseError::from)?;

        if !wornouts.is_empty() {
            warn!(count = wornouts.len(), "Cancelled worn-out tasks");
        }

        Ok(wornouts.len())
    }

    /// Returns to pending every record bound to a worker outside the known
    /// set; called when cluster membership changes.
    pub async fn reset_tasks_with_unknown_worker_uuids(
        &self,
        known_worker_uuids: &[String],
    ) -> Result<u64, QueueError> {
        let mut tx = self.db.begin().await?;
        let reset = self
            .queue_dao
            .reset_tasks_with_unknown_worker_uuids(&mut tx, known_worker_uuids)
            .await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        if reset > 0 {
            warn!(
                count = reset,
                known_workers = known_worker_uuids.len(),
                "Reset tasks claimed by unknown workers"
            );
        }

        Ok(reset)
    }

    /// Purges input payloads whose queue record is gone; returns the count.
    pub async fn purge_orphan_task_inputs(&self) -> Result<u64, QueueError> {
        let mut tx = self.db.begin().await?;
        let orphans = self.queue_dao.select_orphan_task_input_uuids(&mut tx).await?;
        let purged = self.queue_dao.delete_task_inputs(&mut tx, &orphans).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(purged)
    }

    /// Pauses task hand-out; already claimed tasks keep running.
    pub fn pause_workers(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("Workers paused");
    }

    /// Resumes task hand-out.
    pub fn resume_workers(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("Workers resumed");
    }

    /// Returns the current pause status.
    pub fn workers_pause_status(&self) -> WorkersPauseStatus {
        if self.paused.load(Ordering::SeqCst) {
            WorkersPauseStatus::Paused
        } else {
            WorkersPauseStatus::Resumed
        }
    }

    /// Moves one queue record to the activity history as CANCELED.
    async fn cancel_impl(
        &self,
        session: &mut SqliteConnection,
        queue_dto: &QueueDto,
    ) -> Result<(), QueueError> {
        let mut activity = ActivityDto::from_queue(queue_dto, ActivityStatus::Canceled);
        activity.node_name = self.node.node_name().map(str::to_string);
        self.finish(session, queue_dto, &activity).await
    }

    /// Deletes a queue record and appends its activity record.
    async fn finish(
        &self,
        session: &mut SqliteConnection,
        queue_dto: &QueueDto,
        activity: &ActivityDto,
    ) -> Result<(), QueueError> {
        let deleted = self.queue_dao.delete_by_uuid(session, &queue_dto.uuid).await?;
        if deleted == 0 {
            return Err(QueueError::IllegalState(format!(
                "Task does not exist anymore: {}",
                queue_dto.uuid
            )));
        }
        self.activity_dao.insert(session, activity).await?;
        Ok(())
    }
}

impl std::fmt::Debug for QueueCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueCoordinator")
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

fn task_from_dto(
    dto: QueueDto,
    characteristics: std::collections::HashMap<String, String>,
) -> Task {
    Task {
        uuid: dto.uuid,
        task_type: dto.task_type,
        component_uuid: dto.component_uuid,
        main_component_uuid: dto.main_component_uuid,
        submitter_login: dto.submitter_login,
        characteristics,
    }
}
