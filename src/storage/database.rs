//! SQLite database client for persistent queue storage.
//!
//! This module provides the connection-pool wrapper the queue is built on.
//! All mutating operations run inside an explicit transaction obtained from
//! [`Database::begin`]; a transaction dropped without commit rolls back.

use std::str::FromStr;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use super::migrations::{MigrationError, MigrationRunner};

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// A persisted value could not be decoded.
    #[error("Corrupt record: {0}")]
    Decode(String),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// SQLite database client.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connects to the database and returns a new client.
    ///
    /// The database file is created if it does not exist yet.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g. "sqlite://ce.db")
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Connects to a private in-memory database.
    ///
    /// The pool is pinned to a single never-recycled connection: an
    /// in-memory SQLite database lives and dies with its connection.
    pub async fn connect_in_memory() -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Creates a new database client from an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let runner = MigrationRunner::new(self.pool.clone());
        runner.run_migrations().await?;
        Ok(())
    }

    /// Acquires a read session from the pool.
    pub async fn session(&self) -> Result<PoolConnection<Sqlite>, DatabaseError> {
        Ok(self.pool.acquire().await?)
    }

    /// Opens a transaction-scoped session.
    ///
    /// Callers must commit or the change is rolled back when the
    /// transaction is dropped.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, DatabaseError> {
        Ok(self.pool.begin().await?)
    }
}
