//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a global fmt subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Returns `false`
/// when a global subscriber was already installed.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
