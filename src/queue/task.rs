//! Task descriptors exchanged with workers.
//!
//! This module defines the worker-facing types of the queue:
//!
//! - `Task`: the hydrated descriptor a worker receives from `peek`
//! - `TaskSubmit`: a submission request for a new task
//! - `TaskResult`: what a finished task produced
//! - `TaskError`: the structured failure payload persisted with FAILED tasks

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A claimed unit of work handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identity.
    pub uuid: String,
    /// Task type discriminator (e.g. "REPORT").
    pub task_type: String,
    /// Branch or PR component this task analyzes, if any.
    pub component_uuid: Option<String>,
    /// Owning project, if any.
    pub main_component_uuid: Option<String>,
    /// Login of the submitting user, if any.
    pub submitter_login: Option<String>,
    /// Characteristics attached at submission (branch name, PR id, ...).
    #[serde(default)]
    pub characteristics: HashMap<String, String>,
}

/// A request to enqueue a new task.
#[derive(Debug, Clone, Default)]
pub struct TaskSubmit {
    /// Task type discriminator.
    pub task_type: String,
    /// Branch or PR component to analyze, if any.
    pub component_uuid: Option<String>,
    /// Owning project, if any.
    pub main_component_uuid: Option<String>,
    /// Login of the submitting user, if any.
    pub submitter_login: Option<String>,
    /// Characteristics to attach (branch name, PR id, ...).
    pub characteristics: HashMap<String, String>,
    /// Input payload (e.g. the analysis report), if any.
    pub input: Option<Vec<u8>>,
}

impl TaskSubmit {
    /// Creates a submission for the given task type.
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
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

    /// Attaches one characteristic.
    pub fn with_characteristic(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.characteristics.insert(key.into(), value.into());
        self
    }

    /// Attaches an input payload.
    pub fn with_input(mut self, input: Vec<u8>) -> Self {
        self.input = Some(input);
        self
    }
}

/// What a finished task produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Analysis created by the task, if any.
    pub analysis_uuid: Option<String>,
}

impl TaskResult {
    /// Creates an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the analysis uuid.
    pub fn with_analysis_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.analysis_uuid = Some(uuid.into());
        self
    }
}

/// Structured failure payload of a FAILED task.
///
/// Carries the failure kind, message and stacktrace explicitly instead of
/// inferring them from an error type hierarchy. Stacktraces are normalized
/// to `\n` line endings at construction so they persist identically across
/// platforms.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TaskError {
    kind: Option<String>,
    message: String,
    stacktrace: Option<String>,
}

impl TaskError {
    /// Creates a failure with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: message.into(),
            stacktrace: None,
        }
    }

    /// Sets the failure kind discriminator.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Attaches a stacktrace, normalizing line endings.
    pub fn with_stacktrace(mut self, stacktrace: impl Into<String>) -> Self {
        self.stacktrace = Some(normalize_line_endings(&stacktrace.into()));
        self
    }

    /// Returns the failure kind, if one was set.
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the normalized stacktrace, if one was captured.
    pub fn stacktrace(&self) -> Option<&str> {
        self.stacktrace.as_deref()
    }
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
