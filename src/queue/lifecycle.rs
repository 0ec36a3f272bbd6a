//! Queue startup lifecycle.
//!
//! Cleans queue state left behind by the previous incarnation of the server
//! before any worker is allowed to run. Two mutually exclusive paths: after
//! an upgrade every queued task is cancelled (pending reports are not
//! forward-compatible across versions); otherwise orphaned task-input blobs
//! are purged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::node::UpgradeStatus;

use super::coordinator::{QueueCoordinator, QueueError};

/// One-shot startup hook for the queue.
pub struct QueueLifecycle {
    coordinator: Arc<QueueCoordinator>,
    upgrade_status: UpgradeStatus,
    init_lock: Mutex<()>,
    done: AtomicBool,
}

impl QueueLifecycle {
    /// Creates a lifecycle manager for the given coordinator.
    pub fn new(coordinator: Arc<QueueCoordinator>, upgrade_status: UpgradeStatus) -> Self {
        Self {
            coordinator,
            upgrade_status,
            init_lock: Mutex::new(()),
            done: AtomicBool::new(false),
        }
    }

    /// Runs the startup cleaning once.
    ///
    /// Repeated start signals are no-ops; a failed attempt leaves the guard
    /// unset so the next signal retries the cleaning.
    pub async fn initialize(&self) -> Result<(), QueueError> {
        let _guard = self.init_lock.lock().await;
        if self.done.load(Ordering::SeqCst) {
            return Ok(());
        }

        if self.upgrade_status.is_upgraded() {
            let cancelled = self.coordinator.cancel_all(true).await?;
            info!(
                cancelled = cancelled,
                "Upgrade detected, cancelled all queued tasks"
            );
        } else {
            let purged = self.coordinator.purge_orphan_task_inputs().await?;
            if purged > 0 {
                info!(purged = purged, "Purged orphaned task inputs");
            }
        }

        self.done.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Returns true once the startup cleaning has completed.
    pub fn is_initialized(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for QueueLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueLifecycle")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
