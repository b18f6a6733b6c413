//! Closure adapters implementing [`Task`].

use std::fmt;

use super::error::{AppResult, TaskError};
use super::task::Task;
use crate::util::Logger;

type Work = Box<dyn FnOnce() -> AppResult<()> + Send>;

/// Runs a closure exactly once and finishes.
pub struct RunnableTask {
    name: String,
    work: Option<Work>,
}

impl RunnableTask {
    /// Wrap a fallible closure.
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> AppResult<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Some(Box::new(work)),
        }
    }

    /// Wrap a closure that cannot fail.
    pub fn infallible<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(name, move || {
            work();
            Ok(())
        })
    }
}

impl Task for RunnableTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, logger: &Logger) -> Result<bool, TaskError> {
        logger.debug("Running universal runnable.");
        let work = self
            .work
            .take()
            .ok_or_else(|| TaskError::failed(format!("runnable `{}` already ran", self.name)))?;
        work()?;
        Ok(true)
    }
}

impl fmt::Debug for RunnableTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnableTask")
            .field("name", &self.name)
            .field("spent", &self.work.is_none())
            .finish()
    }
}

/// Resumable task driven by a closure that is called once per dispatch.
///
/// The closure returns `Ok(true)` when finished and `Ok(false)` to be re-queued.
pub struct FnTask<F> {
    name: String,
    step: F,
}

impl<F> FnTask<F>
where
    F: FnMut(&Logger) -> Result<bool, TaskError> + Send + 'static,
{
    /// Wrap a step closure.
    pub fn new(name: impl Into<String>, step: F) -> Self {
        Self {
            name: name.into(),
            step,
        }
    }
}

impl<F> Task for FnTask<F>
where
    F: FnMut(&Logger) -> Result<bool, TaskError> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, logger: &Logger) -> Result<bool, TaskError> {
        (self.step)(logger)
    }
}
