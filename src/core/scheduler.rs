//! Fixed-size pool of task runner threads sharing one pending queue.
//!
//! Runners repeatedly take any ready task, step it once, and re-queue it if it
//! is not finished. A task failure is logged and contained; a defect in the
//! runner loop itself (a panic escaping it) restarts that runner in the same
//! slot without touching the others.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --start--> Running --shutdown--> ShuttingDown --last runner exits--> Stopped
//! ```
//!
//! `shutdown` is non-blocking: runners drain the queue and exit. Use
//! [`TaskScheduler::await_shutdown`] to block, and
//! [`TaskScheduler::force_shutdown`] to interrupt runners and, failing that,
//! abandon them.
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_task_engine::config::SchedulerConfig;
//! use prometheus_task_engine::core::{RunnableTask, TaskHandle, TaskScheduler};
//!
//! let scheduler = TaskScheduler::new(SchedulerConfig::new().with_worker_count(4))?;
//! scheduler.start()?;
//!
//! let task = TaskHandle::new(RunnableTask::infallible("hello", || println!("hello")));
//! scheduler.schedule(&task)?.arm().then(|| Ok(()));
//!
//! scheduler.shutdown();
//! scheduler.await_shutdown(Duration::from_secs(5));
//! ```

mod worker;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::error::SchedulerError;
use super::task::TaskHandle;
use super::tracker::TaskTracker;
use crate::config::SchedulerConfig;
use crate::util::Logger;

use worker::WorkerSlot;

thread_local! {
    /// Task the current runner thread is stepping, if any.
    static CURRENT_TASK: RefCell<Option<TaskHandle>> = const { RefCell::new(None) };
}

/// Lifecycle state of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Created, never started.
    Idle,
    /// Runners are processing tasks.
    Running,
    /// Shutdown requested; runners drain the queue.
    ShuttingDown,
    /// All runners exited or were abandoned.
    Stopped,
}

impl SchedulerState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::ShuttingDown => 2,
            Self::Stopped => 3,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

/// How far [`TaskScheduler::force_shutdown`] had to escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceShutdownOutcome {
    /// No runner was active.
    AlreadyStopped,
    /// All runners stopped after being interrupted.
    Interrupted,
    /// Runners were still busy after the grace period and were abandoned.
    Abandoned {
        /// Runners that were still active.
        workers: usize,
    },
}

/// Snapshot of scheduler activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Configured number of runners.
    pub worker_count: usize,
    /// Runners currently alive.
    pub active_workers: usize,
    /// Tasks waiting in the queue.
    pub pending_tasks: usize,
    /// Tasks accepted by `schedule*`.
    pub scheduled_tasks: u64,
    /// Tasks rejected because the scheduler was shutting down.
    pub rejected_tasks: u64,
    /// Dispatches performed.
    pub steps: u64,
    /// Tasks that finished successfully.
    pub completed_tasks: u64,
    /// Tasks whose work function failed.
    pub failed_tasks: u64,
    /// Dispatches that ended with the task re-queued.
    pub requeued_tasks: u64,
    /// Canceled tasks dropped by a runner instead of being completed or re-queued.
    pub skipped_canceled: u64,
    /// Runners restarted after a crash.
    pub worker_restarts: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SchedulerCounters {
    pub scheduled: AtomicU64,
    pub rejected: AtomicU64,
    pub steps: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub requeued: AtomicU64,
    pub skipped_canceled: AtomicU64,
    pub restarts: AtomicU64,
}

pub(crate) struct SchedulerShared {
    pub id: Uuid,
    pub config: SchedulerConfig,
    pub logger: Logger,
    pub pending: Mutex<VecDeque<TaskHandle>>,
    pub task_available: Condvar,
    state: AtomicU8,
    pub interrupted: AtomicBool,
    pub active: Mutex<usize>,
    pub stopped: Condvar,
    pub slots: Mutex<Vec<Option<WorkerSlot>>>,
    pub counters: SchedulerCounters,
    #[cfg(test)]
    pub crash_requests: Mutex<Vec<usize>>,
}

impl SchedulerShared {
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: SchedulerState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self.state(), SchedulerState::ShuttingDown | SchedulerState::Stopped)
    }

    pub fn enqueue(&self, task: TaskHandle) {
        self.pending.lock().push_back(task);
        self.task_available.notify_one();
    }

    pub fn wake_all(&self) {
        let _pending = self.pending.lock();
        self.task_available.notify_all();
    }

    pub fn request_shutdown(&self) {
        self.logger.info("Requesting scheduler stop.");
        {
            let active = self.active.lock();
            self.set_state(if *active == 0 {
                SchedulerState::Stopped
            } else {
                SchedulerState::ShuttingDown
            });
        }
        self.wake_all();
    }

    /// Queue `task`, optionally observed by `tracker` and by the trackers of
    /// the task running on the calling thread.
    pub fn submit(
        &self,
        task: &TaskHandle,
        tracker: Option<&TaskTracker>,
        track_on_current: bool,
    ) -> Result<(), SchedulerError> {
        // Checked under the queue lock: runners decide to exit under the same lock.
        let mut pending = self.pending.lock();
        if self.is_shutting_down() {
            drop(pending);
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            self.logger.warn(format!(
                "Not scheduling Task {} because scheduler is already shutting down!",
                task.name()
            ));
            return Err(SchedulerError::ShuttingDown(task.name().to_owned()));
        }

        if let Some(tracker) = tracker {
            tracker.track(task)?;
        }

        if track_on_current {
            if let Some(current) = TaskScheduler::current_task() {
                for observer in current.trackers() {
                    if let Err(e) = observer.track(task) {
                        debug!(tracker = observer.id(), task = %task.name(), error = %e, "Could not track on current");
                    }
                }
            }
        }

        pending.push_back(task.clone());
        drop(pending);
        self.task_available.notify_one();
        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        trace!(scheduler = %self.id, task = %task.name(), "Task scheduled");
        Ok(())
    }
}

/// Owner of the user-facing handles. Runners and trackers hold only
/// [`SchedulerShared`], so dropping the last [`TaskScheduler`] reaches this.
struct SchedulerHandle {
    shared: Arc<SchedulerShared>,
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if self.shared.state() == SchedulerState::Running {
            debug!(scheduler = %self.shared.id, "Scheduler dropped without explicit shutdown, stopping runners");
            self.shared.request_shutdown();
        }
    }
}

/// Cooperative task scheduler. Cloning yields another handle to the same pool.
///
/// Dropping the last handle of a running scheduler requests a graceful
/// shutdown: queued tasks still run, then the runners exit.
#[derive(Clone)]
pub struct TaskScheduler {
    handle: Arc<SchedulerHandle>,
}

impl TaskScheduler {
    /// Create a scheduler. No runner is spawned until [`Self::start`].
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let logger = Logger::new(config.name.clone()).with_level(config.log_level);
        let shared = Arc::new(SchedulerShared {
            id: Uuid::new_v4(),
            logger,
            pending: Mutex::new(VecDeque::new()),
            task_available: Condvar::new(),
            state: AtomicU8::new(SchedulerState::Idle.as_u8()),
            interrupted: AtomicBool::new(false),
            active: Mutex::new(0),
            stopped: Condvar::new(),
            slots: Mutex::new(Vec::with_capacity(config.worker_count)),
            counters: SchedulerCounters::default(),
            #[cfg(test)]
            crash_requests: Mutex::new(Vec::new()),
            config,
        });
        Ok(Self {
            handle: Arc::new(SchedulerHandle { shared }),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<SchedulerShared> {
        &self.handle.shared
    }

    /// Unique id tasks are bound to.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.handle.shared.id
    }

    /// Configuration this scheduler was built from.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.handle.shared.config
    }

    /// Root logger of this scheduler.
    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.handle.shared.logger
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.handle.shared.state()
    }

    /// Task being stepped on the calling thread, if it is a task runner.
    #[must_use]
    pub fn current_task() -> Option<TaskHandle> {
        CURRENT_TASK.with(|current| current.borrow().clone())
    }

    /// Spawn the configured number of runners.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::AlreadyRunning`] if runners are still active, or
    /// [`SchedulerError::Spawn`] if a thread could not be created (runners
    /// spawned so far are asked to shut down).
    pub fn start(&self) -> Result<(), SchedulerError> {
        let shared = &self.handle.shared;
        let mut active = shared.active.lock();
        if *active > 0 {
            return Err(SchedulerError::AlreadyRunning);
        }

        shared.logger.info("Starting scheduler");
        shared.interrupted.store(false, Ordering::SeqCst);
        shared.set_state(SchedulerState::Running);

        let mut slots = shared.slots.lock();
        slots.clear();
        for index in 0..shared.config.worker_count {
            match worker::spawn(Arc::clone(shared), index, 0) {
                Ok(slot) => {
                    slots.push(Some(slot));
                    *active += 1;
                }
                Err(e) => {
                    drop(slots);
                    drop(active);
                    shared.logger.error(format!("Failed to start task runner {}: {e}", index + 1));
                    self.shutdown();
                    return Err(e);
                }
            }
        }

        info!(
            scheduler = %shared.id,
            worker_count = shared.config.worker_count,
            "Scheduler started"
        );
        Ok(())
    }

    /// Request shutdown and return immediately. Queued tasks still run;
    /// further `schedule*` calls are rejected.
    pub fn shutdown(&self) {
        self.handle.shared.request_shutdown();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.handle.shared.is_shutting_down()
    }

    /// Whether any runner is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.handle.shared.active.lock() > 0
    }

    /// Block until every runner exited or `timeout` elapsed.
    ///
    /// Returns whether all runners exited.
    pub fn await_shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut active = self.handle.shared.active.lock();
        while *active > 0 {
            if self.handle.shared.stopped.wait_until(&mut active, deadline).timed_out() {
                return *active == 0;
            }
        }
        true
    }

    /// Stop runners without waiting for the queue to drain.
    ///
    /// Runners are interrupted at their next dequeue and given the configured
    /// grace period. Runners still busy after that are abandoned: the
    /// scheduler stops waiting for them and the state of their in-flight tasks
    /// is no longer observable. Tasks left in the queue stay there.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ForceWithoutShutdown`] unless [`Self::shutdown`] was
    /// requested first.
    pub fn force_shutdown(&self) -> Result<ForceShutdownOutcome, SchedulerError> {
        if !self.is_running() {
            return Ok(ForceShutdownOutcome::AlreadyStopped);
        }
        if !self.is_shutting_down() {
            return Err(SchedulerError::ForceWithoutShutdown);
        }

        let shared = &self.handle.shared;
        shared.logger.warn("Forcefully stopping scheduler...");
        shared.interrupted.store(true, Ordering::SeqCst);
        shared.wake_all();

        let grace = shared.config.force_shutdown_grace();
        if self.await_shutdown(grace) {
            let left = shared.pending.lock().len();
            if left > 0 {
                shared.logger.warn(format!("{left} queued task(s) were not processed"));
            }
            shared.logger.info("Done!");
            return Ok(ForceShutdownOutcome::Interrupted);
        }

        shared.logger.warn(format!(
            "Task runners did not stop within {grace:?} of being interrupted, abandoning them"
        ));
        let detached: Vec<WorkerSlot> = shared.slots.lock().iter_mut().filter_map(Option::take).collect();
        for slot in &detached {
            debug!(scheduler = %shared.id, generation = slot.generation(), "Detaching task runner");
        }
        let detached = detached.len();
        let still_active = *shared.active.lock();
        shared.set_state(SchedulerState::Stopped);
        shared.logger.error(format!(
            "Abandoned {still_active} task runner(s) out of {detached}; the state of their in-flight tasks is no longer observable"
        ));
        Ok(ForceShutdownOutcome::Abandoned { workers: still_active })
    }

    /// Create an unarmed tracker bound to this scheduler.
    #[must_use]
    pub fn tracker(&self) -> TaskTracker {
        TaskTracker::new(self)
    }

    /// Queue `task` and return a new, unarmed tracker observing it.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShuttingDown`] once shutdown has been requested.
    pub fn schedule(&self, task: &TaskHandle) -> Result<TaskTracker, SchedulerError> {
        let tracker = self.tracker();
        self.schedule_with(task, Some(&tracker), false)?;
        Ok(tracker)
    }

    /// Queue `task`. With `track_on_current`, a call made from inside a running
    /// task also adds `task` to every tracker observing that running task.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShuttingDown`] once shutdown has been requested.
    pub fn schedule_on_current(&self, task: &TaskHandle, track_on_current: bool) -> Result<(), SchedulerError> {
        self.schedule_with(task, None, track_on_current)
    }

    /// Queue `task` observed by `tracker`, returning `tracker` for chaining.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShuttingDown`] once shutdown has been requested, or
    /// [`SchedulerError::TrackerDone`] if `tracker` already completed.
    pub fn schedule_tracked(&self, task: &TaskHandle, tracker: &TaskTracker) -> Result<TaskTracker, SchedulerError> {
        self.schedule_with(task, Some(tracker), false)?;
        Ok(tracker.clone())
    }

    /// Queue `task`, optionally observed by `tracker` and by the trackers of
    /// the task running on the calling thread.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShuttingDown`] once shutdown has been requested, or
    /// [`SchedulerError::TrackerDone`] if `tracker` already completed.
    pub fn schedule_with(
        &self,
        task: &TaskHandle,
        tracker: Option<&TaskTracker>,
        track_on_current: bool,
    ) -> Result<(), SchedulerError> {
        self.handle.shared.submit(task, tracker, track_on_current)
    }

    /// Current activity snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let shared = &self.handle.shared;
        let c = &shared.counters;
        SchedulerStats {
            worker_count: shared.config.worker_count,
            active_workers: *shared.active.lock(),
            pending_tasks: shared.pending.lock().len(),
            scheduled_tasks: c.scheduled.load(Ordering::Relaxed),
            rejected_tasks: c.rejected.load(Ordering::Relaxed),
            steps: c.steps.load(Ordering::Relaxed),
            completed_tasks: c.completed.load(Ordering::Relaxed),
            failed_tasks: c.failed.load(Ordering::Relaxed),
            requeued_tasks: c.requeued.load(Ordering::Relaxed),
            skipped_canceled: c.skipped_canceled.load(Ordering::Relaxed),
            worker_restarts: c.restarts.load(Ordering::Relaxed),
        }
    }

    /// Make runner `index` panic outside of any task at its next loop turn.
    #[cfg(test)]
    fn inject_runner_crash(&self, index: usize) {
        self.handle.shared.crash_requests.lock().push(index);
        self.handle.shared.wake_all();
    }

    #[cfg(test)]
    fn runner_generation(&self, index: usize) -> Option<u64> {
        self.handle.shared
            .slots
            .lock()
            .get(index)
            .and_then(|slot| slot.as_ref().map(WorkerSlot::generation))
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("id", &self.handle.shared.id)
            .field("name", &self.handle.shared.config.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
