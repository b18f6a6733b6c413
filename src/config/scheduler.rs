//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::LogLevel;

/// Smallest stack a task runner thread may be given.
pub const MIN_THREAD_STACK_SIZE: usize = 64 * 1024;

const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_FORCE_SHUTDOWN_GRACE_MS: u64 = 2000;

/// Configuration for a [`TaskScheduler`](crate::core::TaskScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Root tag used for scheduler, runner, and task log lines.
    pub name: String,
    /// Number of task runner threads.
    pub worker_count: usize,
    /// Stack size of each task runner thread, in bytes.
    pub thread_stack_size: usize,
    /// How long `force_shutdown` waits for interrupted runners before abandoning them.
    pub force_shutdown_grace_ms: u64,
    /// Threshold of the scheduler's logger.
    pub log_level: LogLevel,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "TaskScheduler".into(),
            worker_count: num_cpus::get(),
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
            force_shutdown_grace_ms: DEFAULT_FORCE_SHUTDOWN_GRACE_MS,
            log_level: LogLevel::Info,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration: one runner per CPU.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root log tag.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of task runners.
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the stack size of task runner threads.
    #[must_use]
    pub fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Set the grace period granted to interrupted runners.
    #[must_use]
    pub fn with_force_shutdown_grace(mut self, grace: Duration) -> Self {
        self.force_shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the scheduler's log threshold.
    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Grace period for forced shutdown.
    #[must_use]
    pub const fn force_shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.force_shutdown_grace_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.thread_stack_size < MIN_THREAD_STACK_SIZE {
            return Err(format!(
                "thread_stack_size must be at least {MIN_THREAD_STACK_SIZE} bytes"
            ));
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields take defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `TASK_ENGINE_*` environment variables, loading a
    /// `.env` file first if one exists. Unset variables take defaults.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut cfg = Self::default();
        if let Some(name) = lookup("TASK_ENGINE_NAME") {
            cfg.name = name;
        }
        if let Some(raw) = lookup("TASK_ENGINE_WORKERS") {
            cfg.worker_count = parse_var("TASK_ENGINE_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("TASK_ENGINE_STACK_SIZE") {
            cfg.thread_stack_size = parse_var("TASK_ENGINE_STACK_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("TASK_ENGINE_FORCE_GRACE_MS") {
            cfg.force_shutdown_grace_ms = parse_var("TASK_ENGINE_FORCE_GRACE_MS", &raw)?;
        }
        if let Some(raw) = lookup("TASK_ENGINE_LOG_LEVEL") {
            cfg.log_level = raw.parse()?;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("{key}=`{raw}` is invalid: {e}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TASK_ENGINE_NAME", "patcher"),
            ("TASK_ENGINE_WORKERS", "3"),
            ("TASK_ENGINE_LOG_LEVEL", "debug"),
        ]);
        let cfg = SchedulerConfig::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();

        assert_eq!(cfg.name, "patcher");
        assert_eq!(cfg.worker_count, 3);
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.force_shutdown_grace(), Duration::from_secs(2));
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let err = SchedulerConfig::from_lookup(|k| {
            (k == "TASK_ENGINE_WORKERS").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.contains("TASK_ENGINE_WORKERS"));

        let err = SchedulerConfig::from_lookup(|k| {
            (k == "TASK_ENGINE_WORKERS").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(err.contains("worker_count"));
    }
}
