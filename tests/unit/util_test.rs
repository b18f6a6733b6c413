//! Tests for utility functions

use prometheus_task_engine::util::{LogLevel, Logger};

#[test]
fn test_log_level_ordering() {
    assert!(LogLevel::Fatal > LogLevel::Error);
    assert!(LogLevel::Error > LogLevel::Warn);
    assert!(LogLevel::Warn > LogLevel::Info);
    assert!(LogLevel::Info > LogLevel::Debug);
    assert!(LogLevel::Debug > LogLevel::Trace);
}

#[test]
fn test_log_level_numerical() {
    assert_eq!(LogLevel::Trace.numerical(), 5000);
    assert_eq!(LogLevel::Info.numerical(), 20000);
    assert_eq!(LogLevel::Fatal.numerical(), 50000);
}

#[test]
fn test_log_level_serde() {
    let json = serde_json::to_string(&LogLevel::Warn).unwrap();
    assert_eq!(json, "\"warn\"");
    let parsed: LogLevel = serde_json::from_str("\"error\"").unwrap();
    assert_eq!(parsed, LogLevel::Error);
}

#[test]
fn test_logger_threshold() {
    let logger = Logger::new("root").with_level(LogLevel::Warn);
    assert!(logger.enabled(LogLevel::Error));
    assert!(!logger.enabled(LogLevel::Info));

    // Filtered messages are dropped without side effects.
    logger.info("not emitted");
    logger.error("emitted");
}

#[test]
fn test_logger_sub_keeps_threshold() {
    let runner = Logger::new("scheduler").with_level(LogLevel::Trace).sub("Task runner 2");
    assert_eq!(runner.tag(), "scheduler/Task runner 2");
    assert_eq!(runner.level(), LogLevel::Trace);
}
