//! Logging initialization
//!
//! Thin wrappers over `tracing-subscriber`. RUST_LOG always wins over the
//! configured filter.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize global logging with an optional default filter.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(default_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.unwrap_or("info")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Initialize logging from a [`LoggingConfig`].
pub fn init_logging_from_config(config: &LoggingConfig) {
    init_logging(Some(&config.level));
}
