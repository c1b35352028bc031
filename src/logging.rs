//! Opt-in subscriber setup for the `tracing` events emitted by swarmkb.
//!
//! The library itself only emits events; applications that want them on
//! stderr call [`init_logging`] or [`init_logging_with_config`] once.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Errors raised while installing a subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was already installed, or the filter was rejected.
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),
}

/// Minimum severity to display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Per-packet pipeline decisions.
    Trace,
    /// Dropped packets, discarded writes and filter activity.
    Debug,
    /// Transport lifecycle.
    #[default]
    Info,
    /// Rejected calls and failed trigger callbacks.
    Warn,
    /// Unrecoverable transport failures.
    Error,
}

impl LogLevel {
    /// Filter directive for this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(LoggingError::InitializationFailed(format!(
                "unknown log level '{other}'"
            ))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Used when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Include the event target (module path).
    pub with_target: bool,
    /// Include the emitting thread name, e.g. the transport receive loop.
    pub with_thread_names: bool,
    /// Emit JSON lines instead of the human format.
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_target: true,
            with_thread_names: false,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Config with the given level and defaults otherwise.
    #[must_use]
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Toggle target output.
    #[must_use]
    pub const fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Toggle thread name output.
    #[must_use]
    pub const fn with_thread_names(mut self, enabled: bool) -> Self {
        self.with_thread_names = enabled;
        self
    }

    /// Toggle JSON output.
    #[must_use]
    pub const fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }
}

/// Install a subscriber with [`LogConfig::default`].
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(&LogConfig::default())
}

/// Install a subscriber. `RUST_LOG` takes precedence over `config.level`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging_with_config(config: &LogConfig) -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let layer = tracing_fmt::layer()
        .with_target(config.with_target)
        .with_thread_names(config.with_thread_names);

    let result = if config.json_format {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
    };
    result.map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}
