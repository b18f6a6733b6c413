//! Resumable units of work and the shared handle the scheduler drives them through.
//!
//! A [`Task`] performs one dispatch per call to [`Task::run`] and reports whether it
//! is finished. Returning `false` hands the worker back to the scheduler; the task
//! is re-queued and stepped again later, so long-lived work never pins a runner.
//!
//! [`TaskHandle`] wraps a task with its state machine:
//!
//! ```text
//! Pending -> Running -> Done | Failed
//!    \          \
//!     `----------`-> Canceled   (terminal, wins over any later Done/Failed)
//! ```

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use super::error::{SchedulerError, SharedTaskError, TaskError};
use super::tracker::TaskTracker;
use crate::util::Logger;

/// Process-unique task identifier.
pub type TaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A unit of resumable work.
///
/// # Example
///
/// ```rust
/// use prometheus_task_engine::core::{Task, TaskError};
/// use prometheus_task_engine::util::Logger;
///
/// struct Countdown {
///     remaining: u32,
/// }
///
/// impl Task for Countdown {
///     fn name(&self) -> &str {
///         "countdown"
///     }
///
///     fn run(&mut self, logger: &Logger) -> Result<bool, TaskError> {
///         logger.debug(format!("{} steps left", self.remaining));
///         self.remaining = self.remaining.saturating_sub(1);
///         Ok(self.remaining == 0)
///     }
/// }
/// ```
pub trait Task: Send + 'static {
    /// Human readable name, used in log tags and errors.
    fn name(&self) -> &str;

    /// Perform one dispatch.
    ///
    /// Returns `Ok(true)` when the task is finished, `Ok(false)` to be
    /// re-queued, or an error to fail the task and every tracker observing it.
    /// Panics are contained and treated as failures.
    fn run(&mut self, logger: &Logger) -> Result<bool, TaskError>;
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting to be dispatched (initially, or between dispatches).
    Pending,
    /// Currently being stepped by a runner.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed,
    /// Canceled before finishing.
    Canceled,
}

impl TaskState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }
}

/// Result of a single successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    /// The task finished.
    Finished,
    /// The task wants another dispatch.
    Pending,
    /// The task was canceled while its work function ran; its result is dropped.
    Canceled,
}

struct TaskCore {
    state: TaskState,
    error: Option<SharedTaskError>,
    scheduler: Option<Uuid>,
    observers: Vec<TaskTracker>,
}

struct TaskInner {
    id: TaskId,
    name: String,
    work: Mutex<Box<dyn Task>>,
    core: Mutex<TaskCore>,
}

/// Shared, cheaply cloneable handle to a task.
///
/// Two handles are equal when they refer to the same task.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

impl TaskHandle {
    /// Wrap a task in a new handle.
    pub fn new(task: impl Task) -> Self {
        let name = task.name().to_owned();
        Self {
            inner: Arc::new(TaskInner {
                id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
                name,
                work: Mutex::new(Box::new(task)),
                core: Mutex::new(TaskCore {
                    state: TaskState::Pending,
                    error: None,
                    scheduler: None,
                    observers: Vec::new(),
                }),
            }),
        }
    }

    /// A task that never completes on its own; released only through [`Self::settle`].
    pub(crate) fn placeholder() -> Self {
        Self::new(Placeholder)
    }

    /// Unique id of this task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Name of this task.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.core.lock().state
    }

    /// Whether the task finished, successfully or not. Canceled tasks are not done.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.state(), TaskState::Done | TaskState::Failed)
    }

    /// Whether a runner is stepping the task right now. This flips back to
    /// `false` while the task waits in the queue between dispatches.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    /// Whether the task was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.state() == TaskState::Canceled
    }

    /// Whether the task reached any terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// The error the task failed with, if any.
    #[must_use]
    pub fn error(&self) -> Option<SharedTaskError> {
        self.inner.core.lock().error.clone()
    }

    /// Id of the scheduler this task is bound to, once it has been stepped.
    #[must_use]
    pub fn scheduler(&self) -> Option<Uuid> {
        self.inner.core.lock().scheduler
    }

    /// Snapshot of the trackers currently observing this task.
    #[must_use]
    pub fn trackers(&self) -> Vec<TaskTracker> {
        self.inner.core.lock().observers.clone()
    }

    /// Cancel the task.
    ///
    /// A dispatch already in progress is not interrupted, but the task is never
    /// stepped again. Observers are told the task succeeded. Calling this on a
    /// finished task does nothing.
    pub fn cancel(&self) {
        let observers = {
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() {
                return;
            }
            core.state = TaskState::Canceled;
            std::mem::take(&mut core.observers)
        };
        debug!(task = %self.inner.name, "Task canceled");
        self.deliver(observers, None);
    }

    /// Run one dispatch on behalf of `scheduler`.
    ///
    /// Binds the task to `scheduler` on the first call. A work failure is
    /// recorded, delivered to every observer, and returned as
    /// [`SchedulerError::TaskFailed`] for the runner to log.
    pub(crate) fn step(&self, scheduler: Uuid, logger: &Logger) -> Result<StepOutcome, SchedulerError> {
        {
            let mut core = self.inner.core.lock();
            match core.scheduler {
                None => core.scheduler = Some(scheduler),
                Some(bound) if bound != scheduler => {
                    return Err(SchedulerError::SchedulerMismatch {
                        task: self.inner.name.clone(),
                        bound,
                    });
                }
                Some(_) => {}
            }
            if core.state.is_terminal() {
                return Err(SchedulerError::TaskFinished(self.inner.name.clone()));
            }
            core.state = TaskState::Running;
        }

        let task_logger = logger.sub(&format!("Task({})", self.inner.name));
        let result = {
            let mut work = self.inner.work.lock();
            panic::catch_unwind(AssertUnwindSafe(|| work.run(&task_logger)))
                .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))))
        };

        match result {
            Ok(true) => Ok(if self.settle(Ok(())) {
                StepOutcome::Finished
            } else {
                StepOutcome::Canceled
            }),
            Ok(false) => {
                let mut core = self.inner.core.lock();
                if core.state == TaskState::Running {
                    core.state = TaskState::Pending;
                    Ok(StepOutcome::Pending)
                } else {
                    Ok(StepOutcome::Canceled)
                }
            }
            Err(error) => {
                let error: SharedTaskError = Arc::new(error);
                if !self.settle(Err(Arc::clone(&error))) {
                    return Ok(StepOutcome::Canceled);
                }
                Err(SchedulerError::TaskFailed {
                    task: self.inner.name.clone(),
                    source: error,
                })
            }
        }
    }

    /// Move the task into `Done` or `Failed` and notify observers.
    ///
    /// Returns `false` if the task was already terminal (e.g. canceled), in
    /// which case nothing is delivered.
    pub(crate) fn settle(&self, outcome: Result<(), SharedTaskError>) -> bool {
        let observers = {
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() {
                return false;
            }
            match &outcome {
                Ok(()) => core.state = TaskState::Done,
                Err(error) => {
                    core.state = TaskState::Failed;
                    core.error = Some(Arc::clone(error));
                }
            }
            std::mem::take(&mut core.observers)
        };
        self.deliver(observers, outcome.err());
        true
    }

    /// Register `tracker` as an observer.
    ///
    /// `register` runs under this task's lock and must record the task on the
    /// tracker side; it returns `false` to skip registration. Nothing is
    /// registered if the task is already terminal.
    pub(crate) fn now_tracked_by<F>(&self, tracker: &TaskTracker, register: F) -> Result<bool, SchedulerError>
    where
        F: FnOnce() -> Result<bool, SchedulerError>,
    {
        let mut core = self.inner.core.lock();
        if core.state.is_terminal() || !register()? {
            return Ok(false);
        }
        if !core.observers.iter().any(|t| t.ptr_eq(tracker)) {
            core.observers.push(tracker.clone());
        }
        Ok(true)
    }

    // Observers were detached under the task lock; notify without holding it.
    fn deliver(&self, observers: Vec<TaskTracker>, error: Option<SharedTaskError>) {
        for tracker in observers {
            let delivered = match &error {
                None => tracker.notify_done(self),
                Some(error) => tracker.notify_failed(self, Arc::clone(error)),
            };
            if let Err(e) = delivered {
                error!(task = %self.inner.name, tracker = tracker.id(), error = %e, "Failed to notify tracker");
            }
        }
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TaskHandle {}

impl Hash for TaskHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct Placeholder;

impl Task for Placeholder {
    fn name(&self) -> &str {
        "Placeholder"
    }

    fn run(&mut self, _logger: &Logger) -> Result<bool, TaskError> {
        Err(TaskError::failed("placeholder tasks cannot be run"))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Steps {
        calls: u32,
        finish_after: u32,
    }

    impl Task for Steps {
        fn name(&self) -> &str {
            "steps"
        }

        fn run(&mut self, _logger: &Logger) -> Result<bool, TaskError> {
            self.calls += 1;
            Ok(self.calls >= self.finish_after)
        }
    }

    struct Boom;

    impl Task for Boom {
        fn name(&self) -> &str {
            "boom"
        }

        fn run(&mut self, _logger: &Logger) -> Result<bool, TaskError> {
            panic!("kaboom");
        }
    }

    /// Cancels its own handle from inside the work function.
    struct CancelsItself {
        handle: Arc<Mutex<Option<TaskHandle>>>,
        finished: bool,
        fail: bool,
    }

    impl Task for CancelsItself {
        fn name(&self) -> &str {
            "cancels-itself"
        }

        fn run(&mut self, _logger: &Logger) -> Result<bool, TaskError> {
            if let Some(handle) = self.handle.lock().as_ref() {
                handle.cancel();
            }
            if self.fail {
                return Err(TaskError::failed("too late"));
            }
            Ok(self.finished)
        }
    }

    fn cancels_itself(finished: bool, fail: bool) -> TaskHandle {
        let slot = Arc::new(Mutex::new(None));
        let task = TaskHandle::new(CancelsItself {
            handle: Arc::clone(&slot),
            finished,
            fail,
        });
        *slot.lock() = Some(task.clone());
        task
    }

    fn logger() -> Logger {
        Logger::new("test")
    }

    #[test]
    fn test_single_step_finishes() {
        let task = TaskHandle::new(Steps { calls: 0, finish_after: 1 });
        let scheduler = Uuid::new_v4();

        assert_eq!(task.step(scheduler, &logger()).unwrap(), StepOutcome::Finished);
        assert!(task.is_done());
        assert!(task.error().is_none());
        assert_eq!(task.scheduler(), Some(scheduler));
    }

    #[test]
    fn test_multi_step_returns_to_pending() {
        let task = TaskHandle::new(Steps { calls: 0, finish_after: 3 });
        let scheduler = Uuid::new_v4();

        assert_eq!(task.step(scheduler, &logger()).unwrap(), StepOutcome::Pending);
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.step(scheduler, &logger()).unwrap(), StepOutcome::Pending);
        assert_eq!(task.step(scheduler, &logger()).unwrap(), StepOutcome::Finished);
        assert_eq!(task.state(), TaskState::Done);
    }

    #[test]
    fn test_rebinding_to_other_scheduler_fails() {
        let task = TaskHandle::new(Steps { calls: 0, finish_after: 2 });
        let first = Uuid::new_v4();
        task.step(first, &logger()).unwrap();

        let err = task.step(Uuid::new_v4(), &logger()).unwrap_err();
        assert!(matches!(err, SchedulerError::SchedulerMismatch { bound, .. } if bound == first));
        assert_eq!(task.state(), TaskState::Pending);
    }

    #[test]
    fn test_panic_becomes_failure() {
        let task = TaskHandle::new(Boom);
        let err = task.step(Uuid::new_v4(), &logger()).unwrap_err();

        assert!(matches!(err, SchedulerError::TaskFailed { .. }));
        assert_eq!(task.state(), TaskState::Failed);
        let recorded = task.error().unwrap();
        assert!(matches!(recorded.as_ref(), TaskError::Panicked(msg) if msg == "kaboom"));
    }

    #[test]
    fn test_cancel_during_run_is_reported_as_canceled() {
        for (finished, fail) in [(true, false), (false, false), (false, true)] {
            let task = cancels_itself(finished, fail);
            assert_eq!(task.step(Uuid::new_v4(), &logger()).unwrap(), StepOutcome::Canceled);
            assert!(task.is_canceled());
            assert!(task.error().is_none());
        }
    }

    #[test]
    fn test_cancel_is_terminal_and_idempotent() {
        let task = TaskHandle::new(Steps { calls: 0, finish_after: 1 });
        task.cancel();
        task.cancel();

        assert!(task.is_canceled());
        assert!(!task.is_done());
        assert!(task.is_finished());
        assert!(!task.settle(Ok(())));
        assert!(matches!(
            task.step(Uuid::new_v4(), &logger()),
            Err(SchedulerError::TaskFinished(_))
        ));
    }

    #[test]
    fn test_handles_compare_by_identity() {
        let a = TaskHandle::new(Steps { calls: 0, finish_after: 1 });
        let b = TaskHandle::new(Steps { calls: 0, finish_after: 1 });
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }
}
