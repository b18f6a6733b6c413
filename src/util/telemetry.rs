//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::EnvFilter;

use super::logging::LogLevel;

/// Initialize tracing with an env-based filter (`RUST_LOG`). Users can install
/// their own subscriber; this helper is a no-op if one is already set.
pub fn init_tracing() {
    init_tracing_with(LogLevel::Info);
}

/// Initialize tracing, falling back to `default_level` when `RUST_LOG` is unset
/// or invalid.
pub fn init_tracing_with(default_level: LogLevel) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive_for(default_level)));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// `tracing` has no fatal level; fatal messages are emitted as errors.
const fn directive_for(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error | LogLevel::Fatal => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_maps_to_error_directive() {
        assert_eq!(directive_for(LogLevel::Fatal), "error");
        assert_eq!(directive_for(LogLevel::Warn), "warn");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing_with(LogLevel::Debug);
        init_tracing();
        assert!(tracing::dispatcher::has_been_set());
    }
}
