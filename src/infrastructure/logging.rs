//! Logging configuration
//!
//! Initializes tracing for the executor. Build output goes to stdout
//! untouched; diagnostics go through tracing so they can be filtered
//! without polluting the log a CI server stores.

/// Initializes logging. Debug mode lowers the filter to `debug` unless
/// `RUST_LOG` overrides it.
pub fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
