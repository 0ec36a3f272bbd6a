//! Activity record store.
//!
//! Append-only history of finished tasks. Records are never mutated after
//! insert, with one bookkeeping exception: inserting a record demotes the
//! previous latest record sharing its `is_last_key`, so that at most one
//! activity row per (task type, component) pair carries `is_last = true`.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::database::DatabaseError;
use super::records::{ActivityDto, ActivityStatus};

/// Column list for ce_activity selects.
const ACTIVITY_COLUMNS: &str = "uuid, task_type, component_uuid, main_component_uuid, status, \
     submitter_login, worker_uuid, node_name, is_last, is_last_key, analysis_uuid, \
     error_message, error_stacktrace, error_type, started_at, executed_at, execution_time_ms, \
     created_at, updated_at";

/// Filter criteria for querying activity history.
#[derive(Debug, Default, Clone)]
pub struct ActivityQuery {
    /// Filter by analyzed component.
    pub component_uuid: Option<String>,
    /// Filter by owning project.
    pub main_component_uuid: Option<String>,
    /// Filter by terminal status.
    pub status: Option<ActivityStatus>,
    /// Filter by task type.
    pub task_type: Option<String>,
    /// Keep records executed at or after this time (epoch ms).
    pub min_executed_at: Option<i64>,
    /// Keep records executed at or before this time (epoch ms).
    pub max_executed_at: Option<i64>,
    /// Only the latest record per component.
    pub only_last: bool,
    /// Maximum number of results.
    pub limit: Option<i64>,
    /// Offset for pagination.
    pub offset: Option<i64>,
}

impl ActivityQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the component filter.
    pub fn with_component_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.component_uuid = Some(uuid.into());
        self
    }

    /// Sets the owning-project filter.
    pub fn with_main_component_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.main_component_uuid = Some(uuid.into());
        self
    }

    /// Sets the status filter.
    pub fn with_status(mut self, status: ActivityStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the task type filter.
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    /// Sets the minimum execution time filter.
    pub fn with_min_executed_at(mut self, min: i64) -> Self {
        self.min_executed_at = Some(min);
        self
    }

    /// Sets the maximum execution time filter.
    pub fn with_max_executed_at(mut self, max: i64) -> Self {
        self.max_executed_at = Some(max);
        self
    }

    /// Restricts results to the latest record per component.
    pub fn only_last(mut self) -> Self {
        self.only_last = true;
        self
    }

    /// Sets the result limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset for pagination.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    fn where_clause(&self) -> (String, Vec<QueryBind>) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();

        if let Some(ref uuid) = self.component_uuid {
            conditions.push("component_uuid = ?");
            binds.push(QueryBind::Text(uuid.clone()));
        }
        if let Some(ref uuid) = self.main_component_uuid {
            conditions.push("main_component_uuid = ?");
            binds.push(QueryBind::Text(uuid.clone()));
        }
        if let Some(status) = self.status {
            conditions.push("status = ?");
            binds.push(QueryBind::Text(status.as_code().to_string()));
        }
        if let Some(ref task_type) = self.task_type {
            conditions.push("task_type = ?");
            binds.push(QueryBind::Text(task_type.clone()));
        }
        if let Some(min) = self.min_executed_at {
            conditions.push("executed_at >= ?");
            binds.push(QueryBind::Integer(min));
        }
        if let Some(max) = self.max_executed_at {
            conditions.push("executed_at <= ?");
            binds.push(QueryBind::Integer(max));
        }
        if self.only_last {
            conditions.push("is_last = 1");
        }

        if conditions.is_empty() {
            (String::new(), binds)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), binds)
        }
    }
}

enum QueryBind {
    Text(String),
    Integer(i64),
}

/// Data access object for activity records.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActivityDao;

impl ActivityDao {
    /// Creates an activity DAO.
    pub fn new() -> Self {
        Self
    }

    /// Appends an activity record.
    ///
    /// The previous latest record for the same `is_last_key` is demoted
    /// first; the new record is inserted with `is_last = true`. Both writes
    /// happen in the caller's session, so they commit or roll back together.
    pub async fn insert(
        &self,
        session: &mut SqliteConnection,
        dto: &ActivityDto,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE ce_activity SET is_last = 0 WHERE is_last_key = ?")
            .bind(&dto.is_last_key)
            .execute(&mut *session)
            .await?;

        sqlx::query(
            "INSERT INTO ce_activity (uuid, task_type, component_uuid, main_component_uuid, \
             status, submitter_login, worker_uuid, node_name, is_last, is_last_key, \
             analysis_uuid, error_message, error_stacktrace, error_type, started_at, \
             executed_at, execution_time_ms, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&dto.uuid)
        .bind(&dto.task_type)
        .bind(&dto.component_uuid)
        .bind(&dto.main_component_uuid)
        .bind(dto.status.as_code())
        .bind(&dto.submitter_login)
        .bind(&dto.worker_uuid)
        .bind(&dto.node_name)
        .bind(&dto.is_last_key)
        .bind(&dto.analysis_uuid)
        .bind(&dto.error_message)
        .bind(&dto.error_stacktrace)
        .bind(&dto.error_type)
        .bind(dto.started_at)
        .bind(dto.executed_at)
        .bind(dto.execution_time_ms)
        .bind(dto.created_at)
        .bind(dto.updated_at)
        .execute(&mut *session)
        .await?;

        Ok(())
    }

    /// Retrieves an activity record by its uuid.
    pub async fn select_by_uuid(
        &self,
        session: &mut SqliteConnection,
        uuid: &str,
    ) -> Result<Option<ActivityDto>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ce_activity WHERE uuid = ?",
            ACTIVITY_COLUMNS
        ))
        .bind(uuid)
        .fetch_optional(&mut *session)
        .await?;

        row.map(|r| activity_dto_from_row(&r)).transpose()
    }

    /// Lists activity records matching the query, newest first.
    pub async fn select_by_query(
        &self,
        session: &mut SqliteConnection,
        query: &ActivityQuery,
    ) -> Result<Vec<ActivityDto>, DatabaseError> {
        let (where_clause, binds) = query.where_clause();
        let mut sql = format!(
            "SELECT {} FROM ce_activity{} ORDER BY created_at DESC, uuid DESC",
            ACTIVITY_COLUMNS, where_clause
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
            if let Some(offset) = query.offset {
                sql.push_str(&format!(" OFFSET {}", offset));
            }
        }

        let mut sqlx_query = sqlx::query(&sql);
        for bind in binds {
            sqlx_query = match bind {
                QueryBind::Text(value) => sqlx_query.bind(value),
                QueryBind::Integer(value) => sqlx_query.bind(value),
            };
        }

        let rows = sqlx_query.fetch_all(&mut *session).await?;
        rows.iter().map(activity_dto_from_row).collect()
    }

    /// Counts activity records matching the query.
    pub async fn count_by_query(
        &self,
        session: &mut SqliteConnection,
        query: &ActivityQuery,
    ) -> Result<i64, DatabaseError> {
        let (where_clause, binds) = query.where_clause();
        let sql = format!("SELECT COUNT(*) AS cnt FROM ce_activity{}", where_clause);

        let mut sqlx_query = sqlx::query(&sql);
        for bind in binds {
            sqlx_query = match bind {
                QueryBind::Text(value) => sqlx_query.bind(value),
                QueryBind::Integer(value) => sqlx_query.bind(value),
            };
        }

        let row = sqlx_query.fetch_one(&mut *session).await?;
        Ok(row.get("cnt"))
    }

    /// Deletes records created before the given threshold; returns the count.
    pub async fn delete_older_than(
        &self,
        session: &mut SqliteConnection,
        created_before: i64,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM ce_activity WHERE created_at < ?")
            .bind(created_before)
            .execute(&mut *session)
            .await?;

        Ok(result.rows_affected())
    }
}

fn activity_dto_from_row(row: &SqliteRow) -> Result<ActivityDto, DatabaseError> {
    let status_code: String = row.get("status");
    let status = ActivityStatus::from_code(&status_code).ok_or_else(|| {
        DatabaseError::Decode(format!("unknown activity status '{}'", status_code))
    })?;

    Ok(ActivityDto {
        uuid: row.get("uuid"),
        task_type: row.get("task_type"),
        component_uuid: row.get("component_uuid"),
        main_component_uuid: row.get("main_component_uuid"),
        status,
        submitter_login: row.get("submitter_login"),
        worker_uuid: row.get("worker_uuid"),
        node_name: row.get("node_name"),
        is_last: row.get::<i64, _>("is_last") != 0,
        is_last_key: row.get("is_last_key"),
        analysis_uuid: row.get("analysis_uuid"),
        error_message: row.get("error_message"),
        error_stacktrace: row.get("error_stacktrace"),
        error_type: row.get("error_type"),
        started_at: row.get("started_at"),
        executed_at: row.get("executed_at"),
        execution_time_ms: row.get("execution_time_ms"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
