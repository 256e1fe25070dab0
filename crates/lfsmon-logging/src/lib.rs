use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for log files. If None, no file logging.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Prefix for log file names.
    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    /// Log rotation: "hourly", "daily", "never".
    #[serde(default = "default_rotation")]
    pub rotation: String,

    #[serde(default)]
    pub json_format: bool,

    /// Whether to also output to console (stdout).
    #[serde(default = "default_true")]
    pub console_output: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "lfsmon".into()
}

fn default_rotation() -> String {
    "daily".into()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            log_dir: None,
            file_prefix: default_prefix(),
            rotation: default_rotation(),
            json_format: false,
            console_output: true,
        }
    }
}

impl LogConfig {
    /// Same config with a different file prefix, for per-binary log files.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("cannot create log file appender: {0}")]
    Appender(#[from] rolling::InitError),

    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

fn rotation(name: &str) -> rolling::Rotation {
    match name {
        "hourly" => rolling::Rotation::HOURLY,
        "never" => rolling::Rotation::NEVER,
        _ => rolling::Rotation::DAILY,
    }
}

/// Initialize the logging system. Should be called once at program startup.
///
/// Returns a guard that must be held alive for the duration of the program
/// when file logging is enabled.
pub fn init_logging(
    config: &LogConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, LogError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let console_layer: Option<Box<dyn tracing_subscriber::Layer<_> + Send + Sync>> =
        if config.console_output {
            if config.json_format {
                Some(Box::new(fmt::layer().json()))
            } else {
                Some(Box::new(fmt::layer()))
            }
        } else {
            None
        };

    let (file_layer, guard): (
        Option<Box<dyn tracing_subscriber::Layer<_> + Send + Sync>>,
        Option<tracing_appender::non_blocking::WorkerGuard>,
    ) = if let Some(ref log_dir) = config.log_dir {
        let file_appender = rolling::RollingFileAppender::builder()
            .rotation(rotation(&config.rotation))
            .filename_prefix(&config.file_prefix)
            .filename_suffix("log")
            .build(log_dir)?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json_format {
            Box::new(fmt::layer().json().with_writer(non_blocking))
        } else {
            Box::new(fmt::layer().with_ansi(false).with_writer(non_blocking))
        };

        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    registry.with(console_layer).with(file_layer).try_init()?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.rotation, "daily");
        assert!(config.console_output);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LogConfig = toml::from_str("level = \"debug\"\njson_format = true").unwrap();
        assert_eq!(config.level, "debug");
        assert!(config.json_format);
        assert_eq!(config.file_prefix, "lfsmon");
    }

    #[test]
    fn test_rotation_names() {
        assert_eq!(rotation("hourly"), rolling::Rotation::HOURLY);
        assert_eq!(rotation("never"), rolling::Rotation::NEVER);
        assert_eq!(rotation("weekly"), rolling::Rotation::DAILY);
    }

    #[test]
    fn test_with_prefix() {
        assert_eq!(LogConfig::default().with_prefix("agg").file_prefix, "agg");
    }
}
