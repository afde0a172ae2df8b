use std::fs::File;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Errors raised while installing process-wide logging.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("could not open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global subscriber is already installed: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),

    #[error("could not flush log file: {0}")]
    Flush(#[source] std::io::Error),
}

/// Where and how much to log.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// An `EnvFilter` directive. Falls back to `RUST_LOG`, then `info`.
    #[serde(default)]
    pub filter: Option<String>,
    /// Also append plain-text log lines to this file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

/// Handle to the process-wide log pipeline.
///
/// Created once at startup by [`Telemetry::init`]. Call [`Telemetry::shutdown`]
/// before exiting so the log file is synced to disk.
#[derive(Debug)]
#[must_use = "call shutdown() to flush the log file"]
pub struct Telemetry {
    log_file: Option<Arc<File>>,
}

impl Telemetry {
    pub fn init(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let filter = match &config.filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };

        let log_file = match &config.log_path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| TelemetryError::LogFile {
                        path: path.clone(),
                        source,
                    })?;
                Some(Arc::new(file))
            }
            None => None,
        };

        let file_layer = log_file
            .clone()
            .map(|file| fmt::layer().with_ansi(false).with_writer(file));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .with(file_layer)
            .try_init()?;

        info!(
            log_path = ?config.log_path,
            available_parallelism = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            "telemetry initialised"
        );
        Ok(Self { log_file })
    }

    pub fn shutdown(self) -> Result<(), TelemetryError> {
        info!("telemetry shutting down");
        if let Some(file) = &self.log_file {
            file.sync_all().map_err(TelemetryError::Flush)?;
        }
        Ok(())
    }
}
