//! Worker layer polling the queue.
//!
//! This module provides the pool of workers that claim and execute tasks:
//!
//! - **TaskProcessor**: the execution contract implemented by embedders
//! - **Worker**: one claim-execute-remove loop
//! - **WorkerPool**: spawns and supervises N workers with graceful shutdown
//!
//! Workers identify themselves with per-incarnation uuids; the pool
//! reconciles claims of previous incarnations before spawning anyone, and
//! refuses to start until the queue lifecycle finished its startup cleaning.

pub mod processor;
pub mod worker_pool;

// Re-export main types for convenience
pub use processor::{NoopTaskProcessor, TaskProcessor};
pub use worker_pool::{PoolError, Worker, WorkerPool, WorkerPoolConfig};
