//! Compute engine task queue.
//!
//! This module implements the queue core:
//!
//! - **QueueCoordinator**: atomic state transitions (`peek`, `remove`,
//!   `cancel_wornouts`, unknown-worker reconciliation)
//! - **NextPendingTaskPicker**: oldest-first selection with bounded
//!   PR/branch concurrency exceptions
//! - **QueueStatusCounters**: in-memory monitoring counters
//! - **QueueLifecycle**: one-shot startup cleaning
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────┐ peek/remove ┌─────────────────┐
//!    │  Worker  ├────────────►│ QueueCoordinator│
//!    └──────────┘             └───────┬─────────┘
//!                                     │ find_pending_task
//!                             ┌───────▼──────────────┐
//!                             │ NextPendingTaskPicker│
//!                             └───────┬──────────────┘
//!                                     │ select / try_to_peek
//!                             ┌───────▼────────┐
//!                             │   ce_queue /   │
//!                             │  ce_activity   │
//!                             └────────────────┘
//! ```
//!
//! Claims are resolved by the store's conditional update: when several
//! workers race for the same record, exactly one caller wins and the others
//! see an empty result for that attempt.

pub mod coordinator;
pub mod counters;
pub mod lifecycle;
pub mod picker;
pub mod task;

// Re-export main types for convenience
pub use coordinator::{QueueCoordinator, QueueError, WorkersPauseStatus};
pub use counters::{QueueStatusCounters, QueueStatusSnapshot};
pub use lifecycle::QueueLifecycle;
pub use picker::NextPendingTaskPicker;
pub use task::{Task, TaskError, TaskResult, TaskSubmit};
