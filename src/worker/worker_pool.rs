//! Worker pool polling the queue.
//!
//! This module provides the pool of workers that claim and execute queued
//! tasks. Each worker runs as an independent async task, identifies itself
//! with its own worker uuid and polls the coordinator's `peek`.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel
//! - Startup gated on the queue lifecycle initialization
//! - Reconciliation of claims left by previous worker incarnations

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::queue::{QueueCoordinator, QueueError, QueueLifecycle, Task};
use crate::storage::ActivityStatus;

use super::processor::TaskProcessor;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// The queue lifecycle has not completed its startup cleaning.
    #[error("Queue is not initialized")]
    NotInitialized,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long a worker sleeps after an empty peek.
    pub poll_interval: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 2,
            poll_interval: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(40),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Derives the pool configuration from the queue configuration.
    pub fn from_queue_config(config: &QueueConfig) -> Self {
        Self {
            num_workers: config.worker_count,
            poll_interval: config.poll_interval,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Pool of workers claiming tasks from the queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    coordinator: Arc<QueueCoordinator>,
    lifecycle: Arc<QueueLifecycle>,
    processor: Arc<dyn TaskProcessor>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    worker_uuids: Vec<String>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool.
    pub fn new(
        config: WorkerPoolConfig,
        coordinator: Arc<QueueCoordinator>,
        lifecycle: Arc<QueueLifecycle>,
        processor: Arc<dyn TaskProcessor>,
    ) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            coordinator,
            lifecycle,
            processor,
            shutdown_tx,
            worker_handles: Vec::new(),
            worker_uuids: Vec::new(),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// Refuses to start until the queue lifecycle has completed its startup
    /// cleaning. Before the first worker spawns, any claim belonging to a
    /// worker uuid outside the new set is returned to pending.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running
    /// and `PoolError::NotInitialized` if the lifecycle has not run yet.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }
        if !self.lifecycle.is_initialized() {
            return Err(PoolError::NotInitialized);
        }

        self.worker_uuids = (0..self.config.num_workers)
            .map(|_| Uuid::new_v4().to_string())
            .collect();

        // Claims of previous incarnations reference worker uuids that no
        // longer exist; hand their tasks back to the queue.
        self.coordinator
            .reset_tasks_with_unknown_worker_uuids(&self.worker_uuids)
            .await?;

        for worker_uuid in &self.worker_uuids {
            let worker = Worker::new(
                worker_uuid.clone(),
                Arc::clone(&self.coordinator),
                Arc::clone(&self.processor),
                self.shutdown_tx.subscribe(),
                self.config.poll_interval,
            );

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Sends a shutdown signal to all workers and waits for them to finish
    /// their current tasks.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                self.is_running.store(false, Ordering::SeqCst);
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Returns the uuids of the current worker set.
    pub fn worker_uuids(&self) -> &[String] {
        &self.worker_uuids
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("is_running", &self.is_running)
            .finish_non_exhaustive()
    }
}

/// A single worker claiming tasks from the queue.
pub struct Worker {
    /// Worker identity bound to claimed queue records.
    uuid: String,
    /// Queue coordinator.
    coordinator: Arc<QueueCoordinator>,
    /// Task execution logic.
    processor: Arc<dyn TaskProcessor>,
    /// Receiver for shutdown signal.
    shutdown_rx: broadcast::Receiver<()>,
    /// Interval between peeks when the queue is empty.
    poll_interval: Duration,
}

impl Worker {
    /// Creates a new worker.
    fn new(
        uuid: String,
        coordinator: Arc<QueueCoordinator>,
        processor: Arc<dyn TaskProcessor>,
        shutdown_rx: broadcast::Receiver<()>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            uuid,
            coordinator,
            processor,
            shutdown_rx,
            poll_interval,
        }
    }

    /// Main worker loop.
    ///
    /// Continuously peeks for tasks and processes them until a shutdown
    /// signal is received.
    async fn run(mut self) {
        info!(worker_uuid = %self.uuid, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_uuid = %self.uuid, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    // Missed signals can only be shutdowns, check again
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.coordinator.peek(&self.uuid, true).await {
                Ok(Some(task)) => {
                    self.process_task(task).await;
                }
                Ok(None) => {
                    debug!(worker_uuid = %self.uuid, "No task available");
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    // Transient storage failures are retried on the next
                    // scheduling cycle, never within the same call
                    error!(worker_uuid = %self.uuid, error = %e, "Failed to peek task");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_uuid = %self.uuid, "Worker stopped");
    }

    /// Processes one claimed task and reports its terminal status.
    async fn process_task(&self, task: Task) {
        let start_time = Instant::now();

        info!(
            worker_uuid = %self.uuid,
            task_uuid = %task.uuid,
            task_type = %task.task_type,
            "Processing task"
        );

        let removal = match self.processor.process(&task).await {
            Ok(result) => {
                info!(
                    worker_uuid = %self.uuid,
                    task_uuid = %task.uuid,
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    "Task completed"
                );
                self.coordinator
                    .remove(&task, ActivityStatus::Success, Some(&result), None)
                    .await
            }
            Err(task_error) => {
                warn!(
                    worker_uuid = %self.uuid,
                    task_uuid = %task.uuid,
                    error = %task_error,
                    "Task failed"
                );
                self.coordinator
                    .remove(&task, ActivityStatus::Failed, None, Some(&task_error))
                    .await
            }
        };

        if let Err(e) = removal {
            // The task is presumed already handled elsewhere; log and move on
            error!(
                worker_uuid = %self.uuid,
                task_uuid = %task.uuid,
                error = %e,
                "Failed to remove task from queue"
            );
        }
    }

    /// Returns the worker's uuid.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}
