use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use bulkhead_limit::BulkheadConfig;
use bulkhead_limit::ConfigError;
use bulkhead_limit::Registry;
use serde::Deserialize;
use tracing::info;

/// Errors raised while loading bulkhead settings at startup.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("could not read settings from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("bulkhead `{bulkhead}` has an invalid max_wait_duration: {source}")]
    WaitDuration {
        bulkhead: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("bulkhead `{bulkhead}` is misconfigured: {source}")]
    Config {
        bulkhead: String,
        #[source]
        source: ConfigError,
    },
}

/// Startup configuration for a set of named bulkheads.
///
/// ```toml
/// [bulkheads.bulkhead-a]
/// max_concurrent_calls = 8
/// max_wait_duration = "1s"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub bulkheads: BTreeMap<String, BulkheadSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkheadSettings {
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    /// A humantime duration such as `"250ms"` or `"1s"`. Absent means no queueing.
    #[serde(default)]
    pub max_wait_duration: Option<String>,
}

fn default_max_concurrent_calls() -> usize {
    BulkheadConfig::DEFAULT_MAX_CONCURRENT_CALLS.get()
}

impl BulkheadSettings {
    pub fn to_config(&self, name: &str) -> Result<BulkheadConfig, SettingsError> {
        let max_wait = match &self.max_wait_duration {
            Some(raw) => {
                humantime::parse_duration(raw).map_err(|source| SettingsError::WaitDuration {
                    bulkhead: name.to_string(),
                    source,
                })?
            }
            None => Duration::ZERO,
        };
        BulkheadConfig::try_new(self.max_concurrent_calls, max_wait).map_err(|source| {
            SettingsError::Config {
                bulkhead: name.to_string(),
                source,
            }
        })
    }
}

impl Settings {
    pub fn from_toml(raw: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Validate every entry and register it in a fresh [`Registry`].
    ///
    /// Nothing is registered unless every entry is valid.
    pub fn build_registry(&self) -> Result<Registry, SettingsError> {
        let configs = self
            .bulkheads
            .iter()
            .map(|(name, settings)| Ok((name, settings.to_config(name)?)))
            .collect::<Result<Vec<_>, SettingsError>>()?;

        let registry = Registry::new();
        for (name, config) in configs {
            registry
                .create(name.clone(), config)
                .map_err(|source| SettingsError::Config {
                    bulkhead: name.clone(),
                    source,
                })?;
        }

        let available_parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        info!(
            bulkheads = registry.len(),
            available_parallelism, "bulkheads configured"
        );
        Ok(registry)
    }
}
