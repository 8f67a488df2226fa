//! Logging setup.
//!
//! Storage code logs through `tracing` and counts through the `metrics`
//! facade; this module only installs the `tracing` subscriber for the
//! binary. Libraries embedding murmur install their own.

use crate::config::{LogFormat, LoggingConfig};
use crate::{Error, Result};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when nothing else is configured.
pub const DEFAULT_FILTER: &str = "warn";

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Builds the filter: `RUST_LOG`, else `--verbose`, else the configured level, else `warn`.
///
/// # Errors
///
/// Returns an error if the configured directive does not parse.
pub fn build_filter(config: &LoggingConfig, verbose: bool) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = if verbose {
        "murmur=debug,info"
    } else {
        config.level.as_deref().unwrap_or(DEFAULT_FILTER)
    };
    EnvFilter::try_new(directive).map_err(|e| Error::InvalidInput(format!(
        "invalid log level '{directive}': {e}"
    )))
}

/// Installs the global subscriber. Logs go to stderr.
///
/// # Errors
///
/// Returns an error if logging has already been initialized or the filter is invalid.
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Err(init_error("logging already initialized"));
    }
    let filter = build_filter(config, verbose)?;

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_target(true),
            )
            .with(filter)
            .try_init()
            .map_err(init_error)?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .try_init()
            .map_err(init_error)?,
    }

    LOGGING_INIT
        .set(())
        .map_err(|()| init_error("failed to mark logging initialized"))
}

fn init_error(cause: impl std::fmt::Display) -> Error {
    Error::OperationFailed {
        operation: "logging_init".to_string(),
        cause: cause.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_directive_is_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: Some("murmur=notalevel".to_string()),
            format: LogFormat::Pretty,
        };
        assert!(build_filter(&config, false).is_err());
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(build_filter(&LoggingConfig::default(), false).is_ok());
        assert!(build_filter(&LoggingConfig::default(), true).is_ok());
    }
}
