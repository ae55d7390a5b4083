//! Process-wide tracing subscriber.
//!
//! The pipeline emits `tracing` spans and events; the persistence layer uses
//! `log` macros. Both end up in the same `fmt` layer: `log` records are
//! bridged with `tracing-log`.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::config::LoggingSettings;

/// Default filter when neither `RUST_LOG` nor settings provide one.
pub const DEFAULT_FILTER: &str = "docsmith=info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Plain,
    /// One JSON object per event, with span context.
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("A global subscriber is already installed")]
    AlreadyInitialized,
}

/// Builds the filter: `RUST_LOG` first, then the configured directive, then
/// [`DEFAULT_FILTER`].
pub fn build_filter(configured: Option<&str>) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = configured.unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directive).map_err(|e| LoggingError::InvalidFilter {
        filter: directive.to_string(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber. Call once, early in `main`.
pub fn init_logging(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_filter(settings.filter.as_deref())?;

    let installed = match settings.format {
        LogFormat::Plain => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().with_target(true));
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Json => {
            let subscriber = Registry::default().with(filter).with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    installed.map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing_log::LogTracer::init().map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        format = ?settings.format,
        "Logging initialized"
    );
    Ok(())
}
