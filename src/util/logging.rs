//! Tagged, leveled logging handle used by the scheduler, its workers, and tasks.
//!
//! A [`Logger`] is the narrow `log(level, tag, message)` contract: it carries a
//! hierarchical tag (`"scheduler/Task runner 1/Task(fetch)"`) and a threshold
//! level, and forwards accepted messages to `tracing` as structured events.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Severity of a log message, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Very fine grained diagnostics.
    Trace,
    /// Diagnostics useful while debugging.
    Debug,
    /// Regular operational messages.
    Info,
    /// Something unexpected that the system recovered from.
    Warn,
    /// An operation failed.
    Error,
    /// The system cannot continue in a meaningful way.
    Fatal,
}

impl LogLevel {
    /// Numerical representation used for comparing levels.
    #[must_use]
    pub const fn numerical(self) -> u32 {
        match self {
            Self::Trace => 5000,
            Self::Debug => 10000,
            Self::Info => 20000,
            Self::Warn => 30000,
            Self::Error => 40000,
            Self::Fatal => 50000,
        }
    }

    /// Whether a sink configured at `self` receives messages at `other`.
    ///
    /// `Info` includes `Warn`, but `Warn` does not include `Info`. A level
    /// always includes itself.
    #[must_use]
    pub const fn includes(self, other: Self) -> bool {
        self.numerical() <= other.numerical()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

/// Hierarchically tagged logger.
///
/// Cloning is cheap; derived loggers share nothing mutable with their parent.
#[derive(Debug, Clone)]
pub struct Logger {
    tag: Arc<str>,
    threshold: LogLevel,
}

impl Logger {
    /// Create a root logger with the given tag, accepting `Info` and above.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: Arc::from(tag.into()),
            threshold: LogLevel::Info,
        }
    }

    /// Replace the threshold level of this logger.
    #[must_use]
    pub fn with_level(mut self, threshold: LogLevel) -> Self {
        self.threshold = threshold;
        self
    }

    /// Derive a child logger tagged `"<parent>/<child>"` with the same threshold.
    #[must_use]
    pub fn sub(&self, child: &str) -> Self {
        Self {
            tag: Arc::from(format!("{}/{child}", self.tag)),
            threshold: self.threshold,
        }
    }

    /// The full tag of this logger.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The threshold level of this logger.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.threshold
    }

    /// Whether a message at `level` would be emitted.
    #[must_use]
    pub const fn enabled(&self, level: LogLevel) -> bool {
        self.threshold.includes(level)
    }

    /// Emit `message` at `level` if the threshold includes it.
    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        if !self.enabled(level) {
            return;
        }
        let tag: &str = &self.tag;
        match level {
            LogLevel::Trace => tracing::trace!(tag, "{message}"),
            LogLevel::Debug => tracing::debug!(tag, "{message}"),
            LogLevel::Info => tracing::info!(tag, "{message}"),
            LogLevel::Warn => tracing::warn!(tag, "{message}"),
            LogLevel::Error => tracing::error!(tag, "{message}"),
            LogLevel::Fatal => tracing::error!(tag, fatal = true, "{message}"),
        }
    }

    /// Log at [`LogLevel::Trace`].
    pub fn trace(&self, message: impl fmt::Display) {
        self.log(LogLevel::Trace, message);
    }

    /// Log at [`LogLevel::Debug`].
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    /// Log at [`LogLevel::Info`].
    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    /// Log at [`LogLevel::Warn`].
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    /// Log at [`LogLevel::Error`].
    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }

    /// Log at [`LogLevel::Fatal`].
    pub fn fatal(&self, message: impl fmt::Display) {
        self.log(LogLevel::Fatal, message);
    }

    /// Log an error together with its chain of sources.
    pub fn thrown(&self, level: LogLevel, error: &(dyn std::error::Error + 'static)) {
        if !self.enabled(level) {
            return;
        }
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str("\n    caused by: ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        self.log(level, message);
    }
}
