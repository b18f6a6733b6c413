//! Tasks, trackers, and the scheduler that drives them.

pub mod error;
pub mod runnable;
pub mod scheduler;
pub mod task;
pub mod tracker;

pub use error::{AppResult, SchedulerError, SharedTaskError, TaskError};
pub use runnable::{FnTask, RunnableTask};
pub use scheduler::{ForceShutdownOutcome, SchedulerState, SchedulerStats, TaskScheduler};
pub use task::{Task, TaskHandle, TaskId, TaskState};
pub use tracker::TaskTracker;
