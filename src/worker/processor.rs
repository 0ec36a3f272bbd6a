//! Task processing contract.

use async_trait::async_trait;

use crate::queue::{Task, TaskError, TaskResult};

/// Executes claimed tasks.
///
/// Implementations carry the actual analysis logic; the queue only cares
/// about the terminal outcome. A returned error becomes the structured
/// failure payload of the FAILED activity record.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Processes one claimed task to completion.
    async fn process(&self, task: &Task) -> Result<TaskResult, TaskError>;
}

/// Processor that acknowledges every task without doing work.
///
/// Stand-in for deployments where task execution lives outside this crate;
/// also convenient in tests exercising the queue plumbing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTaskProcessor;

#[async_trait]
impl TaskProcessor for NoopTaskProcessor {
    async fn process(&self, _task: &Task) -> Result<TaskResult, TaskError> {
        Ok(TaskResult::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_noop_processor_succeeds() {
        let task = Task {
            uuid: "u1".to_string(),
            task_type: "REPORT".to_string(),
            component_uuid: None,
            main_component_uuid: None,
            submitter_login: None,
            characteristics: HashMap::new(),
        };

        let result = NoopTaskProcessor.process(&task).await.expect("process");
        assert!(result.analysis_uuid.is_none());
    }
}
