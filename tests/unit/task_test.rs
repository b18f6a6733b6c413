//! Tests for task handles and the bundled task types

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use prometheus_task_engine::core::{FnTask, RunnableTask, Task, TaskError, TaskHandle, TaskState};
use prometheus_task_engine::util::Logger;

struct Named(&'static str);

impl Task for Named {
    fn name(&self) -> &str {
        self.0
    }

    fn run(&mut self, _logger: &Logger) -> Result<bool, TaskError> {
        Ok(true)
    }
}

#[test]
fn test_new_handle_is_pending_and_unbound() {
    let task = TaskHandle::new(Named("fresh"));
    assert_eq!(task.name(), "fresh");
    assert_eq!(task.state(), TaskState::Pending);
    assert!(!task.is_done());
    assert!(!task.is_finished());
    assert!(task.error().is_none());
    assert!(task.scheduler().is_none());
    assert!(task.trackers().is_empty());
}

#[test]
fn test_cancel_is_terminal() {
    let task = TaskHandle::new(Named("doomed"));
    task.cancel();
    task.cancel();
    assert!(task.is_canceled());
    assert!(task.is_finished());
    assert!(!task.is_done());
    assert!(TaskState::Canceled.is_terminal());
    assert!(!TaskState::Running.is_terminal());
}

#[test]
fn test_handles_compare_by_identity() {
    let a = TaskHandle::new(Named("same"));
    let b = TaskHandle::new(Named("same"));
    assert_ne!(a, b);
    assert_ne!(a.id(), b.id());

    let set: HashSet<TaskHandle> = [a.clone(), a.clone(), b].into_iter().collect();
    assert_eq!(set.len(), 2);
    assert!(set.contains(&a));
}

#[test]
fn test_runnable_task_runs_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut task = RunnableTask::infallible("once", move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let logger = Logger::new("test");

    assert_eq!(task.name(), "once");
    assert!(task.run(&logger).unwrap());
    assert!(task.run(&logger).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fn_task_steps_until_finished() {
    let mut remaining = 2;
    let mut task = FnTask::new("countdown", move |_: &Logger| {
        remaining -= 1;
        Ok(remaining == 0)
    });
    let logger = Logger::new("test");

    assert!(!task.run(&logger).unwrap());
    assert!(task.run(&logger).unwrap());
}
