//! Database migration helpers.
//!
//! This module provides utilities for running database migrations
//! and managing schema versions.

use sqlx::{Row, SqlitePool};
use thiserror::Error;

use super::schema;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration script failed to execute.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Migration runner for applying schema changes.
pub struct MigrationRunner {
    pool: SqlitePool,
}

impl MigrationRunner {
    /// Creates a new migration runner.
    ///
    /// # Arguments
    ///
    /// * `pool` - SQLite connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Runs all pending migrations.
    ///
    /// This method is idempotent - running it multiple times will not
    /// cause errors or duplicate schema objects due to IF NOT EXISTS clauses.
    pub async fn run_migrations(&self) -> Result<(), MigrationError> {
        self.ensure_migrations_table().await?;

        for (idx, statement) in schema::all_schema_statements().iter().enumerate() {
            let migration_name = format!("schema_v1_part_{}", idx);

            if !self.is_migration_applied(&migration_name).await? {
                self.apply_migration(&migration_name, statement).await?;
            }
        }

        Ok(())
    }

    /// Ensures the migrations tracking table exists.
    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Checks if a migration has already been applied.
    async fn is_migration_applied(&self, name: &str) -> Result<bool, MigrationError> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result.is_some())
    }

    /// Applies a single migration.
    async fn apply_migration(&self, name: &str, sql: &str) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| MigrationError::MigrationFailed(format!("{}: {}", name, e)))?;

        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Returns the names of applied migrations, in application order.
    pub async fn list_applied_migrations(&self) -> Result<Vec<String>, MigrationError> {
        self.ensure_migrations_table().await?;

        let rows = sqlx::query("SELECT name FROM _migrations ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    /// Resets the database by dropping all tables.
    ///
    /// **WARNING**: This will destroy all data! Use only in development/testing.
    pub async fn reset_database(&self) -> Result<(), MigrationError> {
        let drop_statements = [
            "DROP TABLE IF EXISTS ce_task_input",
            "DROP TABLE IF EXISTS ce_task_characteristics",
            "DROP TABLE IF EXISTS ce_activity",
            "DROP TABLE IF EXISTS ce_queue",
            "DROP TABLE IF EXISTS _migrations",
        ];

        for statement in drop_statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| MigrationError::MigrationFailed(format!("Drop failed: {}", e)))?;
        }

        Ok(())
    }
}
