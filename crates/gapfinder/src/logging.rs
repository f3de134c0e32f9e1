//! Tracing subscriber setup.
//!
//! Library code logs through the `log` macros; those records are bridged into
//! `tracing` so they share the subscriber (and the `job`/`item` spans) with
//! native tracing events.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("A global tracing subscriber is already installed")]
    SubscriberInstalled,

    #[error("The log bridge is already installed: {0}")]
    LogBridge(#[from] log::SetLoggerError),
}

/// Builds the filter: `RUST_LOG` wins over the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| LoggingError::Filter {
        filter: config.level.clone(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber and the `log` bridge. Call once at startup.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;

    let json_layer = config.json.then(|| fmt::layer().json().with_current_span(true));
    let text_layer = (!config.json).then(fmt::layer);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| LoggingError::SubscriberInstalled)?;
    tracing_log::LogTracer::init()?;

    log::debug!(
        "Logging initialized (level={}, json={})",
        config.level,
        config.json
    );
    Ok(())
}
