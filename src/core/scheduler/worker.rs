//! Task runner threads and their supervision.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{SchedulerShared, SchedulerState, CURRENT_TASK};
use crate::core::error::SchedulerError;
use crate::core::task::{panic_message, StepOutcome, TaskHandle};
use crate::util::{LogLevel, Logger};

/// A runner occupying one slot of the pool.
pub(crate) struct WorkerSlot {
    // Dropping the handle detaches the thread.
    _handle: JoinHandle<()>,
    generation: u64,
}

impl WorkerSlot {
    /// How many times this slot has been restarted.
    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }
}

struct Worker {
    shared: Arc<SchedulerShared>,
    index: usize,
    generation: u64,
    logger: Logger,
}

/// Spawn the runner for slot `index`.
pub(super) fn spawn(shared: Arc<SchedulerShared>, index: usize, generation: u64) -> Result<WorkerSlot, SchedulerError> {
    let logger = shared.logger.sub(&format!("Task runner {}", index + 1));
    let stack_size = shared.config.thread_stack_size;
    let worker = Worker {
        shared,
        index,
        generation,
        logger,
    };

    let handle = thread::Builder::new()
        .name(format!("task-runner-{index}"))
        .stack_size(stack_size)
        .spawn(move || worker.run_supervised())
        .map_err(|source| SchedulerError::Spawn { index, source })?;

    Ok(WorkerSlot {
        _handle: handle,
        generation,
    })
}

impl Worker {
    fn run_supervised(self) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_loop()));
        CURRENT_TASK.with(|current| current.borrow_mut().take());
        match result {
            Ok(()) => self.exit(),
            Err(payload) => self.restart(payload.as_ref()),
        }
    }

    fn run_loop(&self) {
        self.logger.debug("Runner started.");
        while let Some(task) = self.next_task() {
            if task.is_canceled() {
                self.shared.counters.skipped_canceled.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.dispatch(&task);
        }
        self.logger.debug("Runner terminating.");
    }

    /// Take any ready task, waiting while the queue is empty. Returns `None`
    /// once shutdown was requested and the queue drained, or on interrupt.
    fn next_task(&self) -> Option<TaskHandle> {
        let shared = &self.shared;
        let mut pending = shared.pending.lock();
        loop {
            #[cfg(test)]
            self.crash_if_requested();

            if shared.interrupted.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(task) = pending.pop_front() {
                return Some(task);
            }
            if shared.is_shutting_down() {
                return None;
            }
            shared.task_available.wait(&mut pending);
        }
    }

    fn dispatch(&self, task: &TaskHandle) {
        let counters = &self.shared.counters;
        counters.steps.fetch_add(1, Ordering::Relaxed);

        CURRENT_TASK.with(|current| *current.borrow_mut() = Some(task.clone()));
        let outcome = task.step(self.shared.id, &self.logger);
        CURRENT_TASK.with(|current| current.borrow_mut().take());

        match outcome {
            Ok(StepOutcome::Finished) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(StepOutcome::Canceled) => {
                counters.skipped_canceled.fetch_add(1, Ordering::Relaxed);
            }
            Ok(StepOutcome::Pending) => {
                if task.is_canceled() {
                    counters.skipped_canceled.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.requeued.fetch_add(1, Ordering::Relaxed);
                    self.shared.enqueue(task.clone());
                }
            }
            Err(e) => {
                if matches!(e, SchedulerError::TaskFailed { .. }) {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                self.logger.error(format!("Task {} failed!", task.name()));
                self.logger.thrown(LogLevel::Error, &e);
            }
        }
    }

    fn exit(self) {
        self.shared.wake_all();
        let mut active = self.shared.active.lock();
        *active = active.saturating_sub(1);
        if *active == 0 && self.shared.state() == SchedulerState::ShuttingDown {
            self.shared.set_state(SchedulerState::Stopped);
        }
        drop(active);
        self.shared.stopped.notify_all();
    }

    // Replace this runner with a fresh one in the same slot. The active count
    // is left untouched: the replacement takes over this runner's share.
    fn restart(self, payload: &(dyn Any + Send)) {
        self.logger.warn(format!(
            "Task runner crashed ({}), trying to start again...",
            panic_message(payload)
        ));
        self.shared.counters.restarts.fetch_add(1, Ordering::Relaxed);

        let generation = self.generation + 1;
        let mut slots = self.shared.slots.lock();
        match spawn(Arc::clone(&self.shared), self.index, generation) {
            Ok(slot) => {
                if let Some(entry) = slots.get_mut(self.index) {
                    *entry = Some(slot);
                }
                drop(slots);
                self.logger.info("Task runner restarted.");
            }
            Err(e) => {
                drop(slots);
                self.logger.error(format!("Failed to restart task runner: {e}"));
                self.exit();
            }
        }
    }

    #[cfg(test)]
    fn crash_if_requested(&self) {
        let mut requests = self.shared.crash_requests.lock();
        if let Some(pos) = requests.iter().position(|&i| i == self.index) {
            requests.swap_remove(pos);
            drop(requests);
            panic!("injected fault in task runner {}", self.index + 1);
        }
    }
}
