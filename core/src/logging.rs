//! Structured logging setup
//!
//! Call [`init_logging`] once at startup and keep the returned guard alive for
//! as long as the process logs to a file. A second call fails with
//! [`LoggingError::AlreadyInitialized`] rather than panicking.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Logging is already initialized")]
    AlreadyInitialized,
    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),
    #[error("Log file {path} unusable: {reason}")]
    File { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or `walletlink_core=debug`
    pub level: String,
    /// Emit one JSON object per event instead of human-readable lines
    pub json: bool,
    /// Also append events to this file
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl LogConfig {
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.level).map_err(|_| LoggingError::InvalidFilter(self.level.clone()))
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber described by `config`
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = config.env_filter()?;
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let stderr: BoxedLayer = if config.json {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
    };
    layers.push(stderr);

    let mut guard = None;
    if let Some(path) = &config.file {
        let (layer, file_guard) = file_layer(path, config.json)?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    layers.push(Box::new(filter));

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing::debug!(json = config.json, file = ?config.file, "Logging initialized");
    Ok(guard)
}

fn file_layer(path: &PathBuf, json: bool) -> Result<(BoxedLayer, WorkerGuard), LoggingError> {
    let file_error = |reason: String| LoggingError::File {
        path: path.clone(),
        reason,
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| file_error("path has no file name".to_string()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| file_error(e.to_string()))?;

    let appender = tracing_appender::rolling::never(&dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer: BoxedLayer = if json {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
    };
    Ok((layer, guard))
}
