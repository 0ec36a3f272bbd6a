//! prism-ce: Compute Engine task queue for the Prism code-analysis platform.
//!
//! This library provides a durable, DB-backed distributed work queue with
//! per-project leasing, bounded PR/branch concurrency, oldest-first fairness
//! and crash/restart reconciliation.

// Core modules
pub mod clock;
pub mod config;
pub mod node;
pub mod queue;
pub mod storage;
pub mod worker;

// Re-export commonly used types
pub use clock::{Clock, IncreasingClock, SystemClock};
pub use config::{ConfigError, QueueConfig};
pub use node::{EngineState, EngineStatusHolder, NodeInformation, UpgradeStatus};
pub use queue::{
    QueueCoordinator, QueueError, QueueLifecycle, QueueStatusCounters, Task, TaskError,
    TaskResult, TaskSubmit,
};
pub use storage::{Database, DatabaseError};
pub use worker::{PoolError, TaskProcessor, WorkerPool, WorkerPoolConfig};
