//! Builder turning a [`SchedulerConfig`] into a ready [`TaskScheduler`].

use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::core::{SchedulerError, TaskScheduler};
use crate::util::{init_tracing_with, LogLevel};

/// Build a scheduler from configuration without starting it.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] if the configuration is invalid.
pub fn build_scheduler(cfg: &SchedulerConfig) -> Result<TaskScheduler, SchedulerError> {
    SchedulerBuilder::new(cfg.clone()).build()
}

/// Fluent construction of a [`TaskScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    autostart: bool,
    install_tracing: bool,
}

impl SchedulerBuilder {
    /// Start from an explicit configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            autostart: false,
            install_tracing: false,
        }
    }

    /// Start from `TASK_ENGINE_*` environment variables (and `.env`).
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] if a variable is malformed.
    pub fn from_env() -> Result<Self, SchedulerError> {
        SchedulerConfig::from_env()
            .map(Self::new)
            .map_err(SchedulerError::InvalidConfig)
    }

    /// Root log tag of the scheduler.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration collected so far.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of task runners.
    #[must_use]
    pub fn worker_count(mut self, worker_count: usize) -> Self {
        self.config.worker_count = worker_count;
        self
    }

    /// Grace period for forced shutdown.
    #[must_use]
    pub fn force_shutdown_grace(mut self, grace: Duration) -> Self {
        self.config = self.config.with_force_shutdown_grace(grace);
        self
    }

    /// Log threshold of the scheduler.
    #[must_use]
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    /// Start the runners as part of [`Self::build`].
    #[must_use]
    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Install the default `tracing` subscriber as part of [`Self::build`],
    /// using the configured log level when `RUST_LOG` is unset.
    #[must_use]
    pub fn install_tracing(mut self, install: bool) -> Self {
        self.install_tracing = install;
        self
    }

    /// Validate the configuration and create the scheduler.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] for invalid configuration, or any
    /// error from [`TaskScheduler::start`] when autostart is enabled.
    pub fn build(self) -> Result<TaskScheduler, SchedulerError> {
        self.config.validate().map_err(SchedulerError::InvalidConfig)?;
        if self.install_tracing {
            init_tracing_with(self.config.log_level);
        }
        let scheduler = TaskScheduler::new(self.config)?;
        if self.autostart {
            scheduler.start()?;
        }
        Ok(scheduler)
    }
}
