//! Queue record store.
//!
//! Data access for the ce_queue table and its side-tables (task
//! characteristics, task input blobs). Every method takes an explicit
//! session so that callers can compose several operations into one
//! transaction; nothing here commits.
//!
//! The claim operation ([`QueueDao::try_to_peek`]) is a single conditional
//! UPDATE guarded by `status = 'PENDING'`: when several workers race for the
//! same record, exactly one caller observes an affected row and wins.

use std::sync::Arc;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::clock::Clock;

use super::database::DatabaseError;
use super::records::{task_types, characteristics, BranchType, PrOrBranchTask, QueueDto, TaskStatus};

/// Column list for ce_queue selects.
const QUEUE_COLUMNS: &str = "uuid, task_type, component_uuid, main_component_uuid, status, \
     submitter_login, worker_uuid, started_at, created_at, updated_at";

/// Upper bound on PR/branch candidates examined per picking attempt.
const PR_OR_BRANCH_CANDIDATE_LIMIT: i64 = 100;

/// Data access object for queue records.
#[derive(Clone)]
pub struct QueueDao {
    clock: Arc<dyn Clock>,
}

impl QueueDao {
    /// Creates a queue DAO stamping timestamps from the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Inserts a pending record.
    ///
    /// Unstamped (zero) timestamps are set from the clock; pre-set
    /// timestamps are preserved.
    pub async fn insert(
        &self,
        session: &mut SqliteConnection,
        dto: &mut QueueDto,
    ) -> Result<(), DatabaseError> {
        if dto.created_at == 0 || dto.updated_at == 0 {
            let now = self.clock.now_ms();
            dto.created_at = now;
            dto.updated_at = now;
        }

        sqlx::query(
            "INSERT INTO ce_queue (uuid, task_type, component_uuid, main_component_uuid, status, \
             submitter_login, worker_uuid, started_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&dto.uuid)
        .bind(&dto.task_type)
        .bind(&dto.component_uuid)
        .bind(&dto.main_component_uuid)
        .bind(dto.status.as_code())
        .bind(&dto.submitter_login)
        .bind(&dto.worker_uuid)
        .bind(dto.started_at)
        .bind(dto.created_at)
        .bind(dto.updated_at)
        .execute(&mut *session)
        .await?;

        Ok(())
    }

    /// Retrieves a record by its uuid.
    pub async fn select_by_uuid(
        &self,
        session: &mut SqliteConnection,
        uuid: &str,
    ) -> Result<Option<QueueDto>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ce_queue WHERE uuid = ?",
            QUEUE_COLUMNS
        ))
        .bind(uuid)
        .fetch_optional(&mut *session)
        .await?;

        row.map(|r| queue_dto_from_row(&r)).transpose()
    }

    /// Returns all records, oldest first.
    pub async fn select_all(
        &self,
        session: &mut SqliteConnection,
    ) -> Result<Vec<QueueDto>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ce_queue ORDER BY created_at ASC, uuid ASC",
            QUEUE_COLUMNS
        ))
        .fetch_all(&mut *session)
        .await?;

        rows.iter().map(queue_dto_from_row).collect()
    }

    /// Finds the oldest pending record eligible for claiming.
    ///
    /// A record is eligible when its owning project has no in-progress task;
    /// records without a project are always eligible. The two flags select
    /// between the complementary priority orderings used by the picker:
    /// `exclude_indexation_jobs` removes indexation tasks from this pass,
    /// `prioritize_indexation_jobs` orders them first instead.
    pub async fn select_eligible_for_peek(
        &self,
        session: &mut SqliteConnection,
        exclude_indexation_jobs: bool,
        prioritize_indexation_jobs: bool,
    ) -> Result<Option<QueueDto>, DatabaseError> {
        let mut sql = format!(
            "SELECT {} FROM ce_queue cq \
             WHERE cq.status = ? \
             AND (cq.main_component_uuid IS NULL OR NOT EXISTS ( \
                 SELECT 1 FROM ce_queue cq2 \
                 WHERE cq2.main_component_uuid = cq.main_component_uuid \
                 AND cq2.status = ?))",
            QUEUE_COLUMNS
        );
        if exclude_indexation_jobs {
            sql.push_str(" AND cq.task_type <> ?");
        }
        sql.push_str(" ORDER BY ");
        if prioritize_indexation_jobs {
            sql.push_str("CASE WHEN cq.task_type = ? THEN 0 ELSE 1 END, ");
        }
        sql.push_str("cq.created_at ASC, cq.uuid ASC LIMIT 1");

        let mut query = sqlx::query(&sql)
            .bind(TaskStatus::Pending.as_code())
            .bind(TaskStatus::InProgress.as_code());
        if exclude_indexation_jobs {
            query = query.bind(task_types::ISSUE_SYNC);
        }
        if prioritize_indexation_jobs {
            query = query.bind(task_types::ISSUE_SYNC);
        }

        let row = query.fetch_optional(&mut *session).await?;
        row.map(|r| queue_dto_from_row(&r)).transpose()
    }

    /// Returns the oldest pending PR/branch candidates, oldest first.
    ///
    /// Only analysis tasks qualify; the branch type is derived from the
    /// presence of the `pullRequest` characteristic.
    pub async fn select_oldest_pending_pr_or_branch(
        &self,
        session: &mut SqliteConnection,
    ) -> Result<Vec<PrOrBranchTask>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT cq.uuid, cq.main_component_uuid, cq.component_uuid, cq.task_type, \
             cq.created_at, \
             CASE WHEN c.task_uuid IS NULL THEN 'BRANCH' ELSE 'PULL_REQUEST' END AS branch_type \
             FROM ce_queue cq \
             LEFT JOIN ce_task_characteristics c ON c.task_uuid = cq.uuid AND c.key = ? \
             WHERE cq.status = ? AND cq.task_type = ? \
             ORDER BY cq.created_at ASC, cq.uuid ASC \
             LIMIT ?",
        )
        .bind(characteristics::PULL_REQUEST)
        .bind(TaskStatus::Pending.as_code())
        .bind(task_types::REPORT)
        .bind(PR_OR_BRANCH_CANDIDATE_LIMIT)
        .fetch_all(&mut *session)
        .await?;

        rows.iter().map(pr_or_branch_from_row).collect()
    }

    /// Returns all in-progress records annotated with their branch type.
    pub async fn select_in_progress_with_characteristics(
        &self,
        session: &mut SqliteConnection,
    ) -> Result<Vec<PrOrBranchTask>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT cq.uuid, cq.main_component_uuid, cq.component_uuid, cq.task_type, \
             cq.created_at, \
             CASE WHEN c.task_uuid IS NULL THEN 'BRANCH' ELSE 'PULL_REQUEST' END AS branch_type \
             FROM ce_queue cq \
             LEFT JOIN ce_task_characteristics c ON c.task_uuid = cq.uuid AND c.key = ? \
             WHERE cq.status = ? \
             ORDER BY cq.created_at ASC, cq.uuid ASC",
        )
        .bind(characteristics::PULL_REQUEST)
        .bind(TaskStatus::InProgress.as_code())
        .fetch_all(&mut *session)
        .await?;

        rows.iter().map(pr_or_branch_from_row).collect()
    }

    /// Atomically claims a pending record for a worker.
    ///
    /// Returns the claimed record, or `None` when the record is no longer
    /// pending (another worker won the race, or the record was removed).
    pub async fn try_to_peek(
        &self,
        session: &mut SqliteConnection,
        uuid: &str,
        worker_uuid: &str,
    ) -> Result<Option<QueueDto>, DatabaseError> {
        let now = self.clock.now_ms();
        let result = sqlx::query(
            "UPDATE ce_queue SET status = ?, worker_uuid = ?, started_at = ?, updated_at = ? \
             WHERE uuid = ? AND status = ?",
        )
        .bind(TaskStatus::InProgress.as_code())
        .bind(worker_uuid)
        .bind(now)
        .bind(now)
        .bind(uuid)
        .bind(TaskStatus::Pending.as_code())
        .execute(&mut *session)
        .await?;

        if result.rows_affected() == 1 {
            self.select_by_uuid(session, uuid).await
        } else {
            Ok(None)
        }
    }

    /// Returns the records a worker left in progress, oldest first.
    pub async fn select_not_pending_for_worker(
        &self,
        session: &mut SqliteConnection,
        worker_uuid: &str,
    ) -> Result<Vec<QueueDto>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ce_queue WHERE worker_uuid = ? AND status <> ? \
             ORDER BY created_at ASC, uuid ASC",
            QUEUE_COLUMNS
        ))
        .bind(worker_uuid)
        .bind(TaskStatus::Pending.as_code())
        .fetch_all(&mut *session)
        .await?;

        rows.iter().map(queue_dto_from_row).collect()
    }

    /// Returns one in-progress record to pending.
    ///
    /// Keeps `worker_uuid` and `started_at` so the claim history stays
    /// visible; bumps `updated_at`.
    pub async fn reset_to_pending_by_uuid(
        &self,
        session: &mut SqliteConnection,
        uuid: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE ce_queue SET status = ?, updated_at = ? WHERE uuid = ? AND status <> ?")
            .bind(TaskStatus::Pending.as_code())
            .bind(self.clock.now_ms())
            .bind(uuid)
            .bind(TaskStatus::Pending.as_code())
            .execute(&mut *session)
            .await?;

        Ok(())
    }

    /// Returns in-progress records claimed before the given cutoff.
    ///
    /// These are presumed abandoned by a dead worker and are candidates for
    /// cancellation. The cutoff is derived by the caller from the configured
    /// staleness threshold.
    pub async fn select_wornout(
        &self,
        session: &mut SqliteConnection,
        started_before: i64,
    ) -> Result<Vec<QueueDto>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ce_queue \
             WHERE status = ? AND started_at IS NOT NULL AND started_at < ? \
             ORDER BY created_at ASC, uuid ASC",
            QUEUE_COLUMNS
        ))
        .bind(TaskStatus::InProgress.as_code())
        .bind(started_before)
        .fetch_all(&mut *session)
        .await?;

        rows.iter().map(queue_dto_from_row).collect()
    }

    /// Returns to pending every in-progress record bound to a worker outside
    /// the known set; an empty set resets all in-progress records.
    ///
    /// Clears `worker_uuid`, keeps `created_at` and `started_at`, bumps
    /// `updated_at`. Pending records are never touched.
    pub async fn reset_tasks_with_unknown_worker_uuids(
        &self,
        session: &mut SqliteConnection,
        known_worker_uuids: &[String],
    ) -> Result<u64, DatabaseError> {
        let mut sql = String::from(
            "UPDATE ce_queue SET status = ?, worker_uuid = NULL, updated_at = ? WHERE status = ?",
        );
        if !known_worker_uuids.is_empty() {
            let placeholders = vec!["?"; known_worker_uuids.len()].join(", ");
            sql.push_str(&format!(
                " AND (worker_uuid IS NULL OR worker_uuid NOT IN ({}))",
                placeholders
            ));
        }

        let mut query = sqlx::query(&sql)
            .bind(TaskStatus::Pending.as_code())
            .bind(self.clock.now_ms())
            .bind(TaskStatus::InProgress.as_code());
        for worker_uuid in known_worker_uuids {
            query = query.bind(worker_uuid);
        }

        let result = query.execute(&mut *session).await?;
        Ok(result.rows_affected())
    }

    /// Deletes a record; returns the number of deleted rows (0 or 1).
    pub async fn delete_by_uuid(
        &self,
        session: &mut SqliteConnection,
        uuid: &str,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM ce_queue WHERE uuid = ?")
            .bind(uuid)
            .execute(&mut *session)
            .await?;

        Ok(result.rows_affected())
    }

    /// Counts records with the given status.
    pub async fn count_by_status(
        &self,
        session: &mut SqliteConnection,
        status: TaskStatus,
    ) -> Result<i64, DatabaseError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM ce_queue WHERE status = ?")
            .bind(status.as_code())
            .fetch_one(&mut *session)
            .await?;

        Ok(row.get("cnt"))
    }

    /// Attaches a characteristic to a task.
    pub async fn insert_characteristic(
        &self,
        session: &mut SqliteConnection,
        task_uuid: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO ce_task_characteristics (uuid, task_uuid, key, value) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(task_uuid)
        .bind(key)
        .bind(value)
        .execute(&mut *session)
        .await?;

        Ok(())
    }

    /// Loads the characteristics of a task as a key/value map.
    pub async fn select_characteristics(
        &self,
        session: &mut SqliteConnection,
        task_uuid: &str,
    ) -> Result<std::collections::HashMap<String, String>, DatabaseError> {
        let rows = sqlx::query("SELECT key, value FROM ce_task_characteristics WHERE task_uuid = ?")
            .bind(task_uuid)
            .fetch_all(&mut *session)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let value: Option<String> = row.get("value");
                (row.get("key"), value.unwrap_or_default())
            })
            .collect())
    }

    /// Stores the input payload of a task.
    pub async fn insert_task_input(
        &self,
        session: &mut SqliteConnection,
        task_uuid: &str,
        data: &[u8],
    ) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO ce_task_input (task_uuid, input_data, created_at) VALUES (?, ?, ?)")
            .bind(task_uuid)
            .bind(data)
            .bind(self.clock.now_ms())
            .execute(&mut *session)
            .await?;

        Ok(())
    }

    /// Loads the input payload of a task.
    pub async fn select_task_input(
        &self,
        session: &mut SqliteConnection,
        task_uuid: &str,
    ) -> Result<Option<Vec<u8>>, DatabaseError> {
        let row = sqlx::query("SELECT input_data FROM ce_task_input WHERE task_uuid = ?")
            .bind(task_uuid)
            .fetch_optional(&mut *session)
            .await?;

        Ok(row.map(|r| r.get("input_data")))
    }

    /// Returns the uuids of input payloads whose queue record is gone.
    pub async fn select_orphan_task_input_uuids(
        &self,
        session: &mut SqliteConnection,
    ) -> Result<Vec<String>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT ti.task_uuid FROM ce_task_input ti \
             LEFT JOIN ce_queue cq ON cq.uuid = ti.task_uuid \
             WHERE cq.uuid IS NULL",
        )
        .fetch_all(&mut *session)
        .await?;

        Ok(rows.iter().map(|row| row.get("task_uuid")).collect())
    }

    /// Deletes the input payloads of the given tasks; returns the count.
    pub async fn delete_task_inputs(
        &self,
        session: &mut SqliteConnection,
        task_uuids: &[String],
    ) -> Result<u64, DatabaseError> {
        if task_uuids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; task_uuids.len()].join(", ");
        let sql = format!(
            "DELETE FROM ce_task_input WHERE task_uuid IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for task_uuid in task_uuids {
            query = query.bind(task_uuid);
        }

        let result = query.execute(&mut *session).await?;
        Ok(result.rows_affected())
    }
}

impl std::fmt::Debug for QueueDao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDao").finish_non_exhaustive()
    }
}

fn queue_dto_from_row(row: &SqliteRow) -> Result<QueueDto, DatabaseError> {
    let status_code: String = row.get("status");
    let status = TaskStatus::from_code(&status_code)
        .ok_or_else(|| DatabaseError::Decode(format!("unknown queue status '{}'", status_code)))?;

    Ok(QueueDto {
        uuid: row.get("uuid"),
        task_type: row.get("task_type"),
        component_uuid: row.get("component_uuid"),
        main_component_uuid: row.get("main_component_uuid"),
        status,
        submitter_login: row.get("submitter_login"),
        worker_uuid: row.get("worker_uuid"),
        started_at: row.get("started_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn pr_or_branch_from_row(row: &SqliteRow) -> Result<PrOrBranchTask, DatabaseError> {
    let branch_code: String = row.get("branch_type");
    let branch_type = BranchType::from_code(&branch_code)
        .ok_or_else(|| DatabaseError::Decode(format!("unknown branch type '{}'", branch_code)))?;

    Ok(PrOrBranchTask {
        task_uuid: row.get("uuid"),
        main_component_uuid: row.get("main_component_uuid"),
        component_uuid: row.get("component_uuid"),
        task_type: row.get("task_type"),
        branch_type,
        created_at: row.get("created_at"),
    })
}
