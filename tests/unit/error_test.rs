//! Tests for error types

use std::error::Error as _;
use std::sync::Arc;

use prometheus_task_engine::core::{SchedulerError, TaskError};

#[test]
fn test_task_failed_message_is_verbatim() {
    let err = TaskError::failed("disk full");
    assert_eq!(format!("{}", err), "disk full");
}

#[test]
fn test_panicked_error() {
    let err = TaskError::Panicked("index out of bounds".to_string());
    assert_eq!(format!("{}", err), "task panicked: index out of bounds");
}

#[test]
fn test_other_error_is_transparent() {
    let err = TaskError::from(anyhow::anyhow!("socket closed"));
    assert_eq!(format!("{}", err), "socket closed");
}

#[test]
fn test_shutting_down_error() {
    let err = SchedulerError::ShuttingDown("fetch".to_string());
    assert_eq!(format!("{}", err), "scheduler is shutting down, rejected task `fetch`");
}

#[test]
fn test_tracker_done_error() {
    let err = SchedulerError::TrackerDone;
    assert_eq!(format!("{}", err), "tracker is already done");
}

#[test]
fn test_task_failed_keeps_source() {
    let cause = Arc::new(TaskError::failed("bad checksum"));
    let err = SchedulerError::TaskFailed {
        task: "verify".to_string(),
        source: Arc::clone(&cause),
    };
    assert_eq!(format!("{}", err), "task `verify` failed: bad checksum");
    assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("bad checksum"));
}

#[test]
fn test_invalid_config_error() {
    let err = SchedulerError::InvalidConfig("worker_count must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: worker_count must be greater than 0"
    );
}
