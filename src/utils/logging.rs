// src/utils/logging.rs
// ============================================================================
// LOGGING AND TRACING CONFIGURATION
// ============================================================================
// Structured logging for the ledger, aggregation engine, and coordinator via
// the `tracing` ecosystem: stdout output in text/json/pretty formats plus
// optional non-blocking daily-rotated file output.
// ============================================================================

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Logging errors.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    Initialization(String),

    #[error("failed to create log directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("invalid log level: {0}")]
    InvalidLevel(String),
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace).
    pub level: LogLevel,

    /// Log format for stdout output.
    pub format: LogFormat,

    /// Log directory, used when file logging is enabled.
    pub log_dir: Option<PathBuf>,

    /// Enable daily-rotated file logging.
    pub enable_file_logging: bool,

    /// Enable stdout logging.
    pub enable_stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            log_dir: None,
            enable_file_logging: false,
            enable_stdout: true,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl TryFrom<&str> for LogLevel {
    type Error = LoggingError;

    fn try_from(s: &str) -> Result<Self, LoggingError> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Log format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
    Pretty,
}

/// Initialize the global tracing subscriber.
///
/// Returns the worker guard for the non-blocking file writer when file
/// logging is enabled; the caller must hold it for the process lifetime or
/// buffered log lines are dropped on exit.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut guard = None;

    if config.enable_stdout {
        let layer = match config.format {
            LogFormat::Text => fmt::layer().boxed(),
            LogFormat::Json => fmt::layer().json().boxed(),
            LogFormat::Pretty => fmt::layer().pretty().boxed(),
        };
        layers.push(layer);
    }

    if config.enable_file_logging {
        if let Some(dir) = &config.log_dir {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "fedledger.log");
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().with_writer(writer).with_ansi(false).boxed());
            guard = Some(worker_guard);
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| LoggingError::Initialization(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::try_from("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::try_from("WARN").unwrap(), LogLevel::Warn);
        assert!(LogLevel::try_from("verbose").is_err());
    }

    #[test]
    fn test_init_logging_with_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            log_dir: Some(dir.path().to_path_buf()),
            enable_file_logging: true,
            enable_stdout: false,
            ..LoggingConfig::default()
        };

        // First init in the test process wins; either way the config is valid.
        match init_logging(&config) {
            Ok(guard) => assert!(guard.is_some()),
            Err(LoggingError::Initialization(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
