//! Logging setup for mpdex
//!
//! The daemon runs unattended, so the choice is between human-readable
//! output while developing and JSON lines when a log collector is reading
//! stderr.

use std::str::FromStr;

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Environment variable selecting the [`LoggingMode`]
pub const LOG_MODE_ENV: &str = "MPDEX_LOG_MODE";

/// Environment variable overriding the filter directive
pub const LOG_LEVEL_ENV: &str = "MPDEX_LOG_LEVEL";

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output
    Development,
    /// Verbose diagnostics with source locations
    Debug,
    /// One JSON object per line, for log collectors
    Json,
}

impl FromStr for LoggingMode {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "silent" => Ok(LoggingMode::Silent),
            "development" | "dev" => Ok(LoggingMode::Development),
            "debug" => Ok(LoggingMode::Debug),
            "json" => Ok(LoggingMode::Json),
            other => Err(LoggingError::InvalidMode(other.to_string())),
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid logging mode: {0} (expected silent, development, debug or json)")]
    InvalidMode(String),
}

/// Initialize logging with the specified mode
///
/// Call once, early in `main`. The filter comes from `MPDEX_LOG_LEVEL`, then
/// `RUST_LOG`, then a mode-specific default.
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    init_logging_with_filter(mode, None)
}

/// Like [`init_logging`], but an explicit `directive` wins over the
/// environment.
pub fn init_logging_with_filter(
    mode: LoggingMode,
    directive: Option<&str>,
) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter(directive, "info")?;

            Registry::default()
                .with(fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact())
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter(directive, "debug")?;

            Registry::default()
                .with(fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true))
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Json => {
            let filter = create_env_filter(directive, "info")?;

            Registry::default()
                .with(fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true))
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from environment variables
///
/// `MPDEX_LOG_MODE` is one of `silent`, `development`, `debug` or `json`.
/// Defaults to Development, since mpdex runs as a service rather than in a
/// terminal UI.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var(LOG_MODE_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => LoggingMode::Development,
    };

    init_logging(mode)
}

fn create_env_filter(directive: Option<&str>, default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directive = match directive {
        Some(directive) => directive.to_string(),
        None => std::env::var(LOG_LEVEL_ENV)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| default_level.to_string()),
    };

    EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidFilter(format!("{directive}: {e}")))
}

/// Check if logging has been initialized
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
