//! Subscriber setup for processes that embed jobsmith.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the binary. [`init_logging`] installs the standard one.

use crate::{JobsmithError, Result, config::LoggingConfig};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the event filter: `RUST_LOG` when set, otherwise the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            JobsmithError::Config(format!("invalid log level '{}': {}", config.level, e))
        }),
    }
}

/// Install the global subscriber described by `config`.
///
/// Fails if the level is not a valid filter directive or a global subscriber
/// is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;

    let installed = if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.include_target)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(config.include_target)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()
    };

    installed.map_err(|e| {
        JobsmithError::Config(format!("Failed to initialize tracing subscriber: {}", e))
    })
}
