//! # Prometheus Task Engine
//!
//! A cooperative task-execution engine: a fixed-size pool of runner threads
//! that executes resumable tasks, plus trackers that turn groups of tasks into
//! a composable, promise-like completion signal.
//!
//! ## Core Problem Solved
//!
//! Long-running work should not pin a thread for its whole lifetime, and
//! callers need to know when a *group* of work is finished, not just one job:
//!
//! - **Resumable Tasks**: a task performs one dispatch per step and reports
//!   whether it is finished; unfinished tasks go back into the queue
//! - **Trackers**: observe a dynamic set of tasks, complete exactly once, and
//!   keep the first error
//! - **Chaining**: `then`/`except` schedule continuations on the same pool and
//!   return new trackers
//! - **Crash Containment**: task failures and panics stay local to the task;
//!   a crashed runner is restarted in its own slot
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use prometheus_task_engine::config::SchedulerConfig;
//! use prometheus_task_engine::core::{RunnableTask, TaskHandle, TaskScheduler};
//!
//! # fn main() -> Result<(), prometheus_task_engine::core::SchedulerError> {
//! let scheduler = TaskScheduler::new(SchedulerConfig::new().with_worker_count(4))?;
//! scheduler.start()?;
//!
//! let fetch = TaskHandle::new(RunnableTask::infallible("fetch", || println!("fetching")));
//! let done = scheduler
//!     .schedule(&fetch)?
//!     .arm()
//!     .then(|| {
//!         println!("fetched");
//!         Ok(())
//!     })
//!     .except(|error| {
//!         eprintln!("fetch failed: {error}");
//!         Ok(())
//!     });
//!
//! done.wait(Duration::from_secs(5));
//! scheduler.shutdown();
//! scheduler.await_shutdown(Duration::from_secs(5));
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Tasks, trackers, and the scheduler.
pub mod core;
/// Configuration models for the scheduler.
pub mod config;
/// Builders to construct schedulers from configuration.
pub mod builders;
/// Shared utilities: tagged logging and telemetry.
pub mod util;
