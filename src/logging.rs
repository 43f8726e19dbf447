//! Logging setup.
//!
//! Structured logging through `tracing`, rendered by `tracing-subscriber`.
//! `RUST_LOG` overrides the configured level when set.
//!
//! # Example
//! ```no_run
//! use hplc_interface::logging::{self, LogConfig, OutputFormat};
//! use tracing::Level;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! logging::init(LogConfig::new(Level::DEBUG).with_format(OutputFormat::Compact))?;
//! tracing::info!("Application started");
//! # Ok(())
//! # }
//! ```

use crate::config::Settings;
use crate::error::{HplcError, Result};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, colored (for an operator at the bench)
    #[default]
    Pretty,
    /// One line per event, no colors
    Compact,
    /// JSON objects (for log aggregation)
    Json,
}

/// Logging options.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: Level,
    /// Output format.
    pub format: OutputFormat,
    /// Include source file and line.
    pub with_file_and_line: bool,
    /// Colored output (Pretty only).
    pub with_ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl LogConfig {
    /// Config at the given level with other options defaulted.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Derive logging options from runtime settings.
    ///
    /// Debug mode forces at least `debug` level.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut level = parse_log_level(&settings.log_level)?;
        if settings.debug && level < Level::DEBUG {
            level = Level::DEBUG;
        }
        Ok(Self {
            level,
            with_file_and_line: settings.debug,
            ..Default::default()
        })
    }

    /// Set output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Install the global subscriber.
///
/// Idempotent: a second call leaves the first subscriber in place.
pub fn init(config: LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_filter(env_filter)
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        // Either the dispatcher or the `log` bridge was installed first.
        Err(e) if e.to_string().contains("already") => Ok(()),
        Err(e) => Err(HplcError::Configuration(format!(
            "Failed to initialize logging: {}",
            e
        ))),
    }
}

/// Parse a level name (case-insensitive).
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(HplcError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("warn").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_debug_mode_raises_level() {
        let settings = Settings {
            debug: true,
            ..Settings::default()
        };
        let config = LogConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.with_file_and_line);

        let settings = Settings {
            debug: true,
            log_level: "trace".into(),
            ..Settings::default()
        };
        assert_eq!(LogConfig::from_settings(&settings).unwrap().level, Level::TRACE);
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init(LogConfig::default()).is_ok());
        assert!(init(LogConfig::new(Level::DEBUG)).is_ok());
    }
}
