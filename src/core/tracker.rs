//! Completion tracking over dynamic groups of tasks.
//!
//! A [`TaskTracker`] observes a set of tasks and completes exactly once: after
//! it has been armed and the set has drained. It keeps the first error any
//! observed task failed with, and supports promise-style chaining:
//!
//! ```rust,ignore
//! let tracker = scheduler.tracker();
//! scheduler.schedule_tracked(&download, &tracker)?;
//! scheduler.schedule_tracked(&unpack, &tracker)?;
//!
//! tracker
//!     .arm()
//!     .then(|| { println!("all done"); Ok(()) })
//!     .except(|error| { eprintln!("failed: {error}"); Ok(()) });
//! ```
//!
//! Each `then`/`except` returns a fresh downstream tracker. The downstream
//! tracker holds a placeholder task until its listener has fired, so it can be
//! armed right away without completing before the continuation even exists.
//!
//! Locking: a tracker's own state is only ever locked inside a task lock, never
//! the other way around, and listeners fire after the tracker lock is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use super::error::{AppResult, SchedulerError, SharedTaskError, TaskError};
use super::runnable::RunnableTask;
use super::scheduler::{SchedulerShared, TaskScheduler};
use super::task::{TaskHandle, TaskId};

type SuccessCallback = Box<dyn FnOnce() -> AppResult<()> + Send>;
type FailureCallback = Box<dyn FnOnce(SharedTaskError) -> AppResult<()> + Send>;

static NEXT_TRACKER_ID: AtomicU64 = AtomicU64::new(1);

/// Continuation registered through `then`/`except`.
struct Listener {
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
    downstream: TaskTracker,
    placeholder: TaskHandle,
}

#[derive(Default)]
struct TrackerState {
    observed: HashMap<TaskId, TaskHandle>,
    armed: bool,
    done: bool,
    error: Option<SharedTaskError>,
    listeners: Vec<Listener>,
}

struct TrackerInner {
    id: u64,
    scheduler: Arc<SchedulerShared>,
    state: Mutex<TrackerState>,
    completed: Condvar,
    inherited_by: Mutex<Vec<TaskTracker>>,
}

/// Observer over a dynamic set of tasks with one-shot completion.
#[derive(Clone)]
pub struct TaskTracker {
    inner: Arc<TrackerInner>,
}

impl TaskTracker {
    /// Create an unarmed tracker whose continuations run on `scheduler`.
    #[must_use]
    pub fn new(scheduler: &TaskScheduler) -> Self {
        Self::bound_to(Arc::clone(scheduler.shared()))
    }

    fn bound_to(scheduler: Arc<SchedulerShared>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                id: NEXT_TRACKER_ID.fetch_add(1, Ordering::Relaxed),
                scheduler,
                state: Mutex::new(TrackerState::default()),
                completed: Condvar::new(),
                inherited_by: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Process-unique id of this tracker.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Id of the scheduler continuations are submitted to.
    #[must_use]
    pub fn scheduler_id(&self) -> Uuid {
        self.inner.scheduler.id
    }

    /// Whether this tracker has completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().done
    }

    /// Whether this tracker has been armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().armed
    }

    /// First error reported by an observed task.
    #[must_use]
    pub fn error(&self) -> Option<SharedTaskError> {
        self.inner.state.lock().error.clone()
    }

    /// Number of tasks still observed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().observed.len()
    }

    /// Whether both handles refer to the same tracker.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start observing `task`.
    ///
    /// Finished tasks and tasks already observed are ignored. The task is also
    /// handed to every tracker that inherits from this one.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::TrackerDone`] if this tracker already completed.
    pub fn track(&self, task: &TaskHandle) -> Result<&Self, SchedulerError> {
        if self.is_done() {
            return Err(SchedulerError::TrackerDone);
        }

        let added = task.now_tracked_by(self, || {
            let mut state = self.inner.state.lock();
            if state.done {
                return Err(SchedulerError::TrackerDone);
            }
            if state.observed.contains_key(&task.id()) {
                return Ok(false);
            }
            state.observed.insert(task.id(), task.clone());
            Ok(true)
        })?;

        if added {
            let inheritors = self.inner.inherited_by.lock().clone();
            for inheritor in inheritors {
                if let Err(e) = inheritor.track(task) {
                    debug!(
                        tracker = inheritor.id(),
                        task = %task.name(),
                        error = %e,
                        "Inheriting tracker did not take task"
                    );
                }
            }
        }
        Ok(self)
    }

    /// Inherit every task `other` observes now or starts observing later.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::TrackerDone`] if this tracker already completed.
    pub fn track_tracker(&self, other: &Self) -> Result<&Self, SchedulerError> {
        if self.ptr_eq(other) {
            return Ok(self);
        }
        if self.is_done() {
            return Err(SchedulerError::TrackerDone);
        }

        {
            let mut inheritors = other.inner.inherited_by.lock();
            if !inheritors.iter().any(|t| t.ptr_eq(self)) {
                inheritors.push(self.clone());
            }
        }

        let current: Vec<TaskHandle> = other.inner.state.lock().observed.values().cloned().collect();
        for task in &current {
            self.track(task)?;
        }
        Ok(self)
    }

    /// Arm the tracker. It completes as soon as no observed task is left,
    /// which may be immediately.
    pub fn arm(&self) -> &Self {
        let mut state = self.inner.state.lock();
        state.armed = true;
        self.complete_if_drained(state);
        self
    }

    /// Run `on_success` once every observed task succeeded.
    ///
    /// Failures pass through to the returned tracker unchanged. The returned
    /// tracker is armed.
    pub fn then<F>(&self, on_success: F) -> Self
    where
        F: FnOnce() -> AppResult<()> + Send + 'static,
    {
        self.chain(Some(Box::new(on_success)), None, false)
    }

    /// Like [`Self::then`], but leaves the returned tracker unarmed.
    pub fn then_unarmed<F>(&self, on_success: F) -> Self
    where
        F: FnOnce() -> AppResult<()> + Send + 'static,
    {
        self.chain(Some(Box::new(on_success)), None, true)
    }

    /// Run `on_failure` with the captured error if an observed task failed.
    ///
    /// The returned tracker completes successfully once the handler returns
    /// `Ok`, and fails if the handler returns an error. On success nothing runs
    /// and the returned tracker simply completes. The returned tracker is armed.
    pub fn except<F>(&self, on_failure: F) -> Self
    where
        F: FnOnce(SharedTaskError) -> AppResult<()> + Send + 'static,
    {
        self.chain(None, Some(Box::new(on_failure)), false)
    }

    /// Like [`Self::except`], but leaves the returned tracker unarmed.
    pub fn except_unarmed<F>(&self, on_failure: F) -> Self
    where
        F: FnOnce(SharedTaskError) -> AppResult<()> + Send + 'static,
    {
        self.chain(None, Some(Box::new(on_failure)), true)
    }

    /// Block until the tracker completes or `timeout` elapses.
    ///
    /// Returns whether the tracker completed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.done {
            if self.inner.completed.wait_until(&mut state, deadline).timed_out() {
                return state.done;
            }
        }
        true
    }

    /// Await completion from async code without blocking the runtime.
    ///
    /// Returns whether the tracker completed within `timeout`.
    #[cfg(feature = "tokio-runtime")]
    pub async fn wait_async(&self, timeout: Duration) -> bool {
        let tracker = self.clone();
        tokio::task::spawn_blocking(move || tracker.wait(timeout))
            .await
            .unwrap_or(false)
    }

    /// An observed task finished successfully (or was canceled).
    pub(crate) fn notify_done(&self, task: &TaskHandle) -> Result<(), SchedulerError> {
        self.notify(task.id(), None)
    }

    /// An observed task failed with `error`.
    pub(crate) fn notify_failed(&self, task: &TaskHandle, error: SharedTaskError) -> Result<(), SchedulerError> {
        self.notify(task.id(), Some(error))
    }

    fn notify(&self, task: TaskId, error: Option<SharedTaskError>) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock();
        if state.done {
            return Err(SchedulerError::TrackerDone);
        }
        if state.observed.remove(&task).is_none() {
            return Ok(());
        }
        if let Some(error) = error {
            state.error.get_or_insert(error);
        }
        self.complete_if_drained(state);
        Ok(())
    }

    fn complete_if_drained(&self, mut state: MutexGuard<'_, TrackerState>) {
        if !state.armed || state.done || !state.observed.is_empty() {
            return;
        }
        state.done = true;
        let listeners = std::mem::take(&mut state.listeners);
        let error = state.error.clone();
        drop(state);

        self.inner.completed.notify_all();
        trace!(tracker = self.inner.id, failed = error.is_some(), listeners = listeners.len(), "Tracker completed");
        for listener in listeners {
            self.fire(listener, error.clone());
        }
    }

    fn chain(&self, on_success: Option<SuccessCallback>, on_failure: Option<FailureCallback>, no_arm: bool) -> Self {
        let downstream = Self::bound_to(Arc::clone(&self.inner.scheduler));
        let placeholder = TaskHandle::placeholder();
        if let Err(e) = downstream.track(&placeholder) {
            error!(tracker = downstream.id(), error = %e, "Fresh tracker rejected its placeholder");
        }

        let listener = Listener {
            on_success,
            on_failure,
            downstream: downstream.clone(),
            placeholder,
        };

        let mut state = self.inner.state.lock();
        if state.done {
            let error = state.error.clone();
            drop(state);
            self.fire(listener, error);
        } else {
            state.listeners.push(listener);
            drop(state);
        }

        if !no_arm {
            downstream.arm();
        }
        downstream
    }

    fn fire(&self, listener: Listener, error: Option<SharedTaskError>) {
        let Listener {
            on_success,
            on_failure,
            downstream,
            placeholder,
        } = listener;

        match (error, on_success, on_failure) {
            (None, Some(on_success), _) => {
                self.release_after(RunnableTask::new("SuccessListener", on_success), &downstream, &placeholder);
            }
            (None, None, _) => {
                placeholder.settle(Ok(()));
            }
            (Some(error), _, Some(on_failure)) => {
                let handler = RunnableTask::new("FailureListener", move || on_failure(error));
                self.release_after(handler, &downstream, &placeholder);
            }
            (Some(error), _, None) => {
                placeholder.settle(Err(error));
            }
        }
    }

    // Schedule the continuation on the downstream tracker, then let go of the placeholder.
    fn release_after(&self, continuation: RunnableTask, downstream: &Self, placeholder: &TaskHandle) {
        let task = TaskHandle::new(continuation);
        match self.inner.scheduler.submit(&task, Some(downstream), false) {
            Ok(()) => {
                placeholder.settle(Ok(()));
            }
            Err(e) => {
                warn!(tracker = downstream.id(), task = %task.name(), error = %e, "Continuation could not be scheduled");
                placeholder.settle(Err(Arc::new(TaskError::Rejected(e.to_string()))));
            }
        }
    }
}

impl fmt::Debug for TaskTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TaskTracker")
            .field("id", &self.inner.id)
            .field("observed", &state.observed.len())
            .field("armed", &state.armed)
            .field("done", &state.done)
            .field("failed", &state.error.is_some())
            .finish_non_exhaustive()
    }
}
