//! Logging initialisation for Waddle binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Result, WaddleError};

/// Build the default filter directive for a configured level.
///
/// Waddle crates log at the configured level; everything else is held at
/// `warn` so HTTP client chatter stays out of the way.
pub fn filter_directive(config: &LoggingConfig) -> String {
    format!(
        "warn,waddle_core={level},waddle_xmpp={level},waddle_register={level},waddle_register_cli={level}",
        level = config.level
    )
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(config)))
        .map_err(|error| WaddleError::Telemetry(error.to_string()))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|error| WaddleError::Telemetry(error.to_string()))?;

    tracing::debug!(level = %config.level, "logging initialised");

    Ok(())
}
