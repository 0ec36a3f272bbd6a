//! Record types for the queue and activity tables.
//!
//! These are the persistence-facing shapes: a `QueueDto` is a pending or
//! claimed unit of work, an `ActivityDto` is the immutable historical outcome
//! of a finished one, and a `PrOrBranchTask` is the lightweight projection
//! used only while scoring PR/branch concurrency eligibility.

use serde::{Deserialize, Serialize};

/// Well-known task type discriminators.
pub mod task_types {
    /// Analysis report processing.
    pub const REPORT: &str = "REPORT";
    /// Issue index synchronization (indexation job).
    pub const ISSUE_SYNC: &str = "ISSUE_SYNC";
    /// Application/portfolio refresh.
    pub const APP_REFRESH: &str = "APP_REFRESH";
}

/// Well-known task characteristic keys.
pub mod characteristics {
    /// Pull request identifier; its presence marks a PR task.
    pub const PULL_REQUEST: &str = "pullRequest";
    /// Branch name.
    pub const BRANCH: &str = "branch";
}

/// Status of a queue record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Claimed by a worker and being executed.
    InProgress,
}

impl TaskStatus {
    /// Returns the persisted status code.
    pub fn as_code(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
        }
    }

    /// Parses a persisted status code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "PENDING" => Some(TaskStatus::Pending),
            "IN_PROGRESS" => Some(TaskStatus::InProgress),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Terminal status of a finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityStatus {
    /// The task completed successfully.
    Success,
    /// The task failed.
    Failed,
    /// The task was cancelled before or instead of completing.
    Canceled,
}

impl ActivityStatus {
    /// Returns the persisted status code.
    pub fn as_code(&self) -> &'static str {
        match self {
            ActivityStatus::Success => "SUCCESS",
            ActivityStatus::Failed => "FAILED",
            ActivityStatus::Canceled => "CANCELED",
        }
    }

    /// Parses a persisted status code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "SUCCESS" => Some(ActivityStatus::Success),
            "FAILED" => Some(ActivityStatus::Failed),
            "CANCELED" => Some(ActivityStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Branch flavor of a PR/branch concurrency candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchType {
    /// A pull-request analysis.
    PullRequest,
    /// A branch analysis (including the main branch).
    Branch,
}

impl BranchType {
    /// Returns the persisted code.
    pub fn as_code(&self) -> &'static str {
        match self {
            BranchType::PullRequest => "PULL_REQUEST",
            BranchType::Branch => "BRANCH",
        }
    }

    /// Parses a persisted code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "PULL_REQUEST" => Some(BranchType::PullRequest),
            "BRANCH" => Some(BranchType::Branch),
            _ => None,
        }
    }
}

/// A row of the ce_queue table: a pending or in-progress unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDto {
    /// Unique task identity.
    pub uuid: String,
    /// Task type discriminator (e.g. "REPORT").
    pub task_type: String,
    /// Branch or PR component this task analyzes, if any.
    pub component_uuid: Option<String>,
    /// Owning project, used for exclusivity grouping.
    pub main_component_uuid: Option<String>,
    /// Current status.
    pub status: TaskStatus,
    /// Login of the submitting user, if any.
    pub submitter_login: Option<String>,
    /// Worker that claimed the task, set on claim.
    pub worker_uuid: Option<String>,
    /// When the task was last claimed, if ever.
    pub started_at: Option<i64>,
    /// Submission time (epoch ms). Zero means "stamp at insert".
    pub created_at: i64,
    /// Last modification time (epoch ms). Zero means "stamp at insert".
    pub updated_at: i64,
}

impl QueueDto {
    /// Creates a pending queue record with unstamped timestamps.
    pub fn new(uuid: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            task_type: task_type.into(),
            component_uuid: None,
            main_component_uuid: None,
            status: TaskStatus::Pending,
            submitter_login: None,
            worker_uuid: None,
            started_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Sets the component and owning project uuids.
    pub fn with_component(
        mut self,
        component_uuid: impl Into<String>,
        main_component_uuid: impl Into<String>,
    ) -> Self {
        self.component_uuid = Some(component_uuid.into());
        self.main_component_uuid = Some(main_component_uuid.into());
        self
    }

    /// Sets the submitter login.
    pub fn with_submitter(mut self, login: impl Into<String>) -> Self {
        self.submitter_login = Some(login.into());
        self
    }

    /// Sets an explicit creation time (tests and backfills).
    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }
}

/// A row of the ce_activity table: the immutable outcome of a finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityDto {
    /// Task identity, copied from the queue record.
    pub uuid: String,
    /// Task type discriminator.
    pub task_type: String,
    /// Analyzed component, if any.
    pub component_uuid: Option<String>,
    /// Owning project, if any.
    pub main_component_uuid: Option<String>,
    /// Terminal status.
    pub status: ActivityStatus,
    /// Login of the submitting user, if any.
    pub submitter_login: Option<String>,
    /// Worker that held the task when it finished, if any.
    pub worker_uuid: Option<String>,
    /// Name of the node that finished the task, if known.
    pub node_name: Option<String>,
    /// Whether this is the latest activity for its `is_last_key`.
    pub is_last: bool,
    /// Latest-per-component grouping key (task type + component uuid).
    pub is_last_key: String,
    /// Analysis produced by the task, if any.
    pub analysis_uuid: Option<String>,
    /// Failure message, only for FAILED records.
    pub error_message: Option<String>,
    /// Failure stacktrace with normalized line endings.
    pub error_stacktrace: Option<String>,
    /// Failure kind discriminator.
    pub error_type: Option<String>,
    /// When the task was last claimed, if ever.
    pub started_at: Option<i64>,
    /// When the task finished (epoch ms).
    pub executed_at: Option<i64>,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: Option<i64>,
    /// Submission time, copied from the queue record.
    pub created_at: i64,
    /// Last modification time of the queue record.
    pub updated_at: i64,
}

impl ActivityDto {
    /// Builds an activity record from a queue record and a terminal status.
    ///
    /// `is_last` starts false; the activity store flips it on insert once the
    /// previous latest record for the same key has been demoted.
    pub fn from_queue(queue: &QueueDto, status: ActivityStatus) -> Self {
        let is_last_key = format!(
            "{}{}",
            queue.task_type,
            queue.component_uuid.as_deref().unwrap_or("")
        );
        Self {
            uuid: queue.uuid.clone(),
            task_type: queue.task_type.clone(),
            component_uuid: queue.component_uuid.clone(),
            main_component_uuid: queue.main_component_uuid.clone(),
            status,
            submitter_login: queue.submitter_login.clone(),
            worker_uuid: queue.worker_uuid.clone(),
            node_name: None,
            is_last: false,
            is_last_key,
            analysis_uuid: None,
            error_message: None,
            error_stacktrace: None,
            error_type: None,
            started_at: queue.started_at,
            executed_at: None,
            execution_time_ms: None,
            created_at: queue.created_at,
            updated_at: queue.updated_at,
        }
    }
}

/// Projection of a queue record used during PR/branch eligibility scoring.
///
/// Not persisted; recomputed on every picking attempt and owned by the picker
/// for the duration of one `find_pending_task` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrOrBranchTask {
    /// Queue record identity.
    pub task_uuid: String,
    /// Owning project.
    pub main_component_uuid: Option<String>,
    /// Analyzed component (for a PR, this identifies the PR).
    pub component_uuid: Option<String>,
    /// Task type discriminator.
    pub task_type: String,
    /// Whether this task analyzes a PR or a branch.
    pub branch_type: BranchType,
    /// Submission time (epoch ms).
    pub created_at: i64,
}
