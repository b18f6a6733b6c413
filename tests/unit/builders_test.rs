//! Tests for builder modules

use std::time::Duration;

use prometheus_task_engine::builders::{build_scheduler, SchedulerBuilder};
use prometheus_task_engine::config::SchedulerConfig;
use prometheus_task_engine::core::{SchedulerError, SchedulerState};
use prometheus_task_engine::util::LogLevel;

#[test]
fn test_scheduler_builder_defaults() {
    let config = SchedulerConfig::new().with_name("builder").with_worker_count(2);

    let builder = SchedulerBuilder::new(config);
    assert_eq!(builder.name(), "builder");
    assert_eq!(builder.config().worker_count, 2);
}

#[test]
fn test_scheduler_builder_overrides() {
    let builder = SchedulerBuilder::new(SchedulerConfig::new())
        .worker_count(5)
        .force_shutdown_grace(Duration::from_millis(100))
        .log_level(LogLevel::Warn);

    assert_eq!(builder.config().worker_count, 5);
    assert_eq!(builder.config().force_shutdown_grace_ms, 100);
    assert_eq!(builder.config().log_level, LogLevel::Warn);
}

#[test]
fn test_build_scheduler_does_not_start() {
    let scheduler = build_scheduler(&SchedulerConfig::new().with_worker_count(1)).unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert!(!scheduler.is_running());
}

#[test]
fn test_builder_autostart() {
    let scheduler = SchedulerBuilder::new(SchedulerConfig::new().with_name("auto"))
        .worker_count(1)
        .autostart(true)
        .build()
        .unwrap();
    assert!(scheduler.is_running());

    scheduler.shutdown();
    assert!(scheduler.await_shutdown(Duration::from_secs(5)));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let err = SchedulerBuilder::new(SchedulerConfig::new())
        .worker_count(0)
        .build()
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}
