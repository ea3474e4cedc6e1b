//! Logging setup for applications embedding the control point
//!
//! Every crate in the workspace logs through `tracing`. Nothing is printed
//! until the application installs a subscriber, either its own or one of the
//! presets below.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Environment variable overriding the log level or filter directive.
pub const LOG_LEVEL_ENV: &str = "UPNP_CP_LOG_LEVEL";

/// Environment variable restricting output to one target, e.g. `upnp_ssdp`.
pub const LOG_TARGET_ENV: &str = "UPNP_CP_LOG_TARGET";

/// Environment variable selecting the mode for [`init_logging_from_env`].
pub const LOG_MODE_ENV: &str = "UPNP_CP_LOG_MODE";

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output, `info` and above
    Development,
    /// Verbose output with thread ids and source locations
    Debug,
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

/// Initialize logging with the specified mode
///
/// # Examples
///
/// ```rust,ignore
/// upnp_cp::logging::init_logging(LoggingMode::Development)?;
/// ```
///
/// # Environment Variables
///
/// - `UPNP_CP_LOG_LEVEL`: Override log level (error, warn, info, debug, trace)
/// - `UPNP_CP_LOG_TARGET`: Filter by target (e.g. "upnp_ssdp")
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_names(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `UPNP_CP_LOG_MODE` ("silent", "development", "debug").
///
/// Defaults to silent when the variable is unset; any other value is an error.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var(LOG_MODE_ENV) {
        Ok(value) => parse_mode(&value)?,
        Err(_) => LoggingMode::Silent,
    };
    init_logging(mode)
}

fn parse_mode(value: &str) -> Result<LoggingMode, LoggingError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "silent" => Ok(LoggingMode::Silent),
        "development" | "dev" => Ok(LoggingMode::Development),
        "debug" => Ok(LoggingMode::Debug),
        other => Err(LoggingError::InvalidEnv(format!("{}={}", LOG_MODE_ENV, other))),
    }
}

/// Build the filter: `UPNP_CP_LOG_LEVEL`, then `RUST_LOG`, then `default_level`,
/// narrowed to `UPNP_CP_LOG_TARGET` when that is set.
fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let level = std::env::var(LOG_LEVEL_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());
    let directive = match std::env::var(LOG_TARGET_ENV) {
        Ok(target) if !target.trim().is_empty() => target_directive(target.trim(), &level),
        _ => level,
    };
    EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidEnv(format!("{}: {}", directive, e)))
}

fn target_directive(target: &str, level: &str) -> String {
    // A full directive in the level variable already names its targets
    if level.contains('=') {
        level.to_string()
    } else {
        format!("{}={}", target, level)
    }
}

/// Check if a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

pub fn init_silent() -> Result<(), LoggingError> {
    init_logging(LoggingMode::Silent)
}
