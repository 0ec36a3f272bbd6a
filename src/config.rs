//! Queue configuration.
//!
//! This module provides configuration for the task queue, including the
//! parallel PR/branch execution flag, the worn-out staleness threshold, the
//! database location and worker-pool sizing.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the compute engine queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// SQLite database URL (e.g. "sqlite://ce.db").
    pub database_url: String,
    /// Whether PR/branch tasks of one project may run concurrently.
    pub parallel_project_tasks_enabled: bool,
    /// How long a claimed task may stay in progress before it is presumed
    /// abandoned and becomes a cancellation candidate.
    pub wornout_threshold: Duration,
    /// Number of worker loops to run.
    pub worker_count: usize,
    /// How long a worker sleeps between peeks when the queue is empty.
    pub poll_interval: Duration,
    /// Timeout for graceful worker-pool shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ce.db".to_string(),
            parallel_project_tasks_enabled: false,
            wornout_threshold: Duration::from_secs(2 * 60 * 60),
            worker_count: 2,
            poll_interval: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(40),
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Enables or disables parallel PR/branch execution.
    pub fn with_parallel_project_tasks(mut self, enabled: bool) -> Self {
        self.parallel_project_tasks_enabled = enabled;
        self
    }

    /// Sets the worn-out staleness threshold.
    pub fn with_wornout_threshold(mut self, threshold: Duration) -> Self {
        self.wornout_threshold = threshold;
        self
    }

    /// Sets the number of workers.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the worker poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Loads configuration from the environment, falling back to defaults.
    ///
    /// Recognized variables: `CE_DATABASE_URL`,
    /// `CE_PARALLEL_PROJECT_TASKS_ENABLED`, `CE_WORNOUT_THRESHOLD_SECONDS`,
    /// `CE_WORKER_COUNT`, `CE_POLL_INTERVAL_SECONDS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CE_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(enabled) = read_env("CE_PARALLEL_PROJECT_TASKS_ENABLED", parse_bool)? {
            config.parallel_project_tasks_enabled = enabled;
        }
        if let Some(secs) = read_env("CE_WORNOUT_THRESHOLD_SECONDS", parse_u64)? {
            config.wornout_threshold = Duration::from_secs(secs);
        }
        if let Some(count) = read_env("CE_WORKER_COUNT", parse_u64)? {
            config.worker_count = count as usize;
        }
        if let Some(secs) = read_env("CE_POLL_INTERVAL_SECONDS", parse_u64)? {
            config.poll_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url must not be empty".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.wornout_threshold.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "wornout_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env<T>(
    key: &str,
    parse: fn(&str) -> Result<T, String>,
) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => parse(&raw)
            .map(Some)
            .map_err(|message| ConfigError::InvalidValue {
                key: key.to_string(),
                message,
            }),
        Err(_) => Ok(None),
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("expected a boolean, got '{}'", other)),
    }
}

fn parse_u64(raw: &str) -> Result<u64, String> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| format!("expected an integer: {}", e))
}
