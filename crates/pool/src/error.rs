//! Error types for the worker pool
//!
//! Construction problems are reported synchronously through [`PoolError`].
//! Everything that can go wrong with a single invocation only ever surfaces
//! through its [`Invocation`](crate::Invocation) as an [`InvocationError`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing a [`WorkerPool`](crate::WorkerPool)
#[derive(Debug, Error)]
pub enum PoolError {
    /// Configuration rejected by [`PoolConfig::validate`](crate::PoolConfig::validate)
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Task identifier cannot be used to build a bootstrap
    #[error("invalid task definition: {0}")]
    InvalidTask(String),

    /// The pool was built outside of a tokio runtime
    #[error("worker pool must be created inside a tokio runtime")]
    NoRuntime,
}

/// Failure of a single invocation
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The unit reported an error while running the task
    #[error("task failed: {0}")]
    Task(TaskError),

    /// The deadline elapsed and the unit was stopped
    #[error("unit timed out after {limit:?}")]
    TimedOut { limit: Duration },

    /// The pool was terminated while the invocation was queued or running
    #[error("pool terminated")]
    Terminated,

    /// The unit could not be started or died before replying
    #[error("unit unavailable: {0}")]
    Unit(#[from] UnitError),
}

impl InvocationError {
    /// Whether this failure came from the per-invocation deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Whether this failure came from pool shutdown
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Errors from an execution unit itself, as opposed to the task it runs
#[derive(Debug, Error)]
pub enum UnitError {
    /// The unit could not be started
    #[error("failed to spawn unit: {0}")]
    Spawn(String),

    /// The unit no longer accepts messages
    #[error("unit message channel is closed")]
    Disconnected,

    /// The unit went away without replying
    #[error("unit exited before replying")]
    Exited,

    /// I/O failure talking to the unit
    #[error("unit i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error reported by a task handler
///
/// Serializable so that it survives the trip back from a process unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl TaskError {
    /// Create a new task error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub(crate) fn unknown_task(task: &str) -> Self {
        Self::new(format!("no task registered under '{task}'")).with_type("unknown_task")
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(message).with_type("invalid_argument")
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(kind) => write!(f, "{} ({})", self.message, kind),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
