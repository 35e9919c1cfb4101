//! Tracing subscriber setup
//!
//! Events go to stderr (plain or JSON) and optionally to a daily-rolling
//! file. `RUST_LOG` overrides the configured level.

use crate::config::LoggingConfig;
use crate::error::{AppError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// File name prefix of rolled log files.
pub const LOG_FILE_PREFIX: &str = "content-vault.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// Keep the returned guard alive for as long as file logging should work;
/// dropping it flushes and stops the background writer.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(&config.level, rust_log.as_deref())?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.json {
        layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
    } else {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .boxed(),
        );
    }

    let mut guard = None;
    if let Some(directory) = &config.directory {
        std::fs::create_dir_all(directory).map_err(|e| {
            AppError::io_error(format!("Failed to create log directory: {}", e), directory)
        })?;
        let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| AppError::config_error(format!("Failed to install logger: {}", e)))?;

    tracing::debug!(
        level = %config.level,
        json = config.json,
        directory = ?config.directory,
        "Logging initialized"
    );

    Ok(guard)
}

/// Filter from `RUST_LOG` when it is set and valid, otherwise from `level`.
pub fn build_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter> {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return Ok(filter);
        }
    }

    EnvFilter::try_new(level)
        .map_err(|e| AppError::config_error(format!("Invalid log level '{}': {}", level, e)))
}
