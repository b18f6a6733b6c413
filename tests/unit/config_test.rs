//! Tests for configuration validation

use std::time::Duration;

use prometheus_task_engine::config::{SchedulerConfig, MIN_THREAD_STACK_SIZE};
use prometheus_task_engine::util::LogLevel;

#[test]
fn test_scheduler_config_defaults() {
    let config = SchedulerConfig::default();
    assert_eq!(config.name, "TaskScheduler");
    assert!(config.worker_count >= 1);
    assert_eq!(config.force_shutdown_grace(), Duration::from_secs(2));
    assert_eq!(config.log_level, LogLevel::Info);
    assert!(config.validate().is_ok());
}

#[test]
fn test_scheduler_config_invalid_worker_count() {
    let invalid = SchedulerConfig::new().with_worker_count(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_name() {
    let invalid = SchedulerConfig::new().with_name("  ");
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_stack_size() {
    let invalid = SchedulerConfig::new().with_thread_stack_size(MIN_THREAD_STACK_SIZE - 1);
    assert!(invalid.validate().is_err());

    let valid = SchedulerConfig::new().with_thread_stack_size(MIN_THREAD_STACK_SIZE);
    assert!(valid.validate().is_ok());
}

#[test]
fn test_scheduler_config_from_json() {
    let config = SchedulerConfig::from_json_str(
        r#"{"name": "indexer", "worker_count": 3, "log_level": "debug"}"#,
    )
    .unwrap();
    assert_eq!(config.name, "indexer");
    assert_eq!(config.worker_count, 3);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.force_shutdown_grace_ms, 2000);
}

#[test]
fn test_scheduler_config_from_json_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{"worker_count": 0}"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_force_shutdown_grace_round_trip() {
    let config = SchedulerConfig::new().with_force_shutdown_grace(Duration::from_millis(250));
    assert_eq!(config.force_shutdown_grace_ms, 250);
    assert_eq!(config.force_shutdown_grace(), Duration::from_millis(250));
}
