//! Error types for tasks, trackers, and the scheduler.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

/// Failure raised by a task's work function.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The work function reported a failure.
    #[error("{0}")]
    Failed(String),
    /// The work function panicked; the panic was contained by the worker.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// A continuation could not be handed to the scheduler.
    #[error("continuation rejected: {0}")]
    Rejected(String),
    /// Any other error produced by user code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    /// Shorthand for [`TaskError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A task error shared between the task and every tracker observing it.
pub type SharedTaskError = Arc<TaskError>;

/// Usage and lifecycle errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The task already ran on a different scheduler.
    #[error("task `{task}` is already bound to scheduler {bound}")]
    SchedulerMismatch {
        /// Name of the task.
        task: String,
        /// Scheduler the task is bound to.
        bound: Uuid,
    },
    /// The task reached a terminal state and cannot be stepped again.
    #[error("task `{0}` has already finished")]
    TaskFinished(String),
    /// The scheduler no longer accepts tasks.
    #[error("scheduler is shutting down, rejected task `{0}`")]
    ShuttingDown(String),
    /// `start` was called while workers are still active.
    #[error("scheduler is already running")]
    AlreadyRunning,
    /// `force_shutdown` was called without a prior `shutdown`.
    #[error("forced shutdown requested without a prior graceful shutdown")]
    ForceWithoutShutdown,
    /// The tracker already fired and accepts no further tracking or notifications.
    #[error("tracker is already done")]
    TrackerDone,
    /// A task's work function failed during a step.
    #[error("task `{task}` failed: {source}")]
    TaskFailed {
        /// Name of the task.
        task: String,
        /// The error recorded on the task.
        #[source]
        source: SharedTaskError,
    },
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A worker thread could not be spawned.
    #[error("failed to spawn task runner {index}: {source}")]
    Spawn {
        /// Slot index of the worker.
        index: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Application-facing result using anyhow for user callbacks.
pub type AppResult<T> = Result<T, anyhow::Error>;
