//! Structured logging setup on top of `tracing-subscriber`.
//!
//! Three output formats are supported:
//! - **pretty**: multi-line, human-oriented, for local runs
//! - **json**: one object per line, for log shipping
//! - **compact**: single-line text
//!
//! Output goes to stderr so that command output on stdout stays parseable.

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("unknown log format: {s}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("logging already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Logging settings; the `[logging]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `tickfed_core=debug`.
    pub level: String,
    pub format: LogFormat,
    /// Emit span open/close events.
    pub with_span_events: bool,
    pub with_file: bool,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// `LOG_FORMAT` replaces the configured format when it parses.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(format) = std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|value| value.parse().ok())
        {
            self.format = format;
        }
        self
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `config.level`.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_target(config.with_target)
        .with_span_events(span_events);

    match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.pretty())
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.compact())
            .try_init()?,
    }

    tracing::debug!(format = ?config.format, level = %config.level, "logging initialized");
    Ok(())
}
