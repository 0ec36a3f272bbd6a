//! SQLite persistent storage for the compute engine queue.
//!
//! # Overview
//!
//! The storage system consists of:
//! - **Database**: pool wrapper handing out sessions and transactions
//! - **QueueDao**: the queue record store (pending/in-progress tasks)
//! - **ActivityDao**: the append-only history of finished tasks
//! - **Migrations**: idempotent schema management
//!
//! # Usage
//!
//! ```rust,ignore
//! use prism_ce::storage::{ActivityQuery, Database, QueueDao};
//!
//! // Connect and migrate
//! let db = Database::connect("sqlite://ce.db").await?;
//! db.run_migrations().await?;
//!
//! // Claim the next eligible task inside one transaction
//! let mut tx = db.begin().await?;
//! if let Some(candidate) = dao.select_eligible_for_peek(&mut tx, true, false).await? {
//!     dao.try_to_peek(&mut tx, &candidate.uuid, "worker-1").await?;
//! }
//! tx.commit().await?;
//! ```

pub mod activity_dao;
pub mod database;
pub mod migrations;
pub mod queue_dao;
pub mod records;
pub mod schema;

// Re-export main types for convenience
pub use activity_dao::{ActivityDao, ActivityQuery};
pub use database::{Database, DatabaseError};
pub use migrations::{MigrationError, MigrationRunner};
pub use queue_dao::QueueDao;
pub use records::{
    characteristics, task_types, ActivityDto, ActivityStatus, BranchType, PrOrBranchTask,
    QueueDto, TaskStatus,
};
