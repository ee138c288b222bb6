//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! tiddler-config.toml file. It covers feed presentation, where readings and
//! the published feed are stored, and how the generation job is run and timed.
//!
//! Components never read this file themselves: [`Config::feed`],
//! [`Config::run_config`] and [`Config::open_store`] turn it into the explicit
//! values each component takes.

use crate::calendar::FeedConfig;
use crate::orchestrator::RunConfig;
use crate::storage::{HttpStore, LocalStore, ObjectLocation, ObjectStore, StorageError};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE: &str = "tiddler-config.toml";

/// Configuration values that parse as TOML but cannot be used.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown display time zone `{0}`")]
    TimeZone(String),

    #[error("invalid {field} location: {source}")]
    Location {
        field: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("storage backend `http` needs an endpoint")]
    MissingEndpoint,

    #[error(transparent)]
    Endpoint(StorageError),

    #[error("job command is empty")]
    EmptyCommand,
}

/// Application configuration loaded from tiddler-config.toml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Feed presentation
    pub feed: FeedSettings,
    /// Object store and artifact locations
    pub storage: StorageConfig,
    /// Generation job and timeouts
    pub job: JobConfig,
}

/// How events are labelled and formatted
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedSettings {
    /// Calendar name shown by subscribing clients
    pub name: String,
    /// Event location text
    pub location_label: String,
    /// Height the rising/falling markers stand for, as display text
    pub threshold: String,
    /// IANA zone for times written into event text
    pub display_tz: String,
    /// Last line of every event description
    pub footer: String,
}

/// Which object store to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Http,
}

/// Object store and artifact locations
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend
    pub root: PathBuf,
    /// Base URL for the http backend
    pub endpoint: Option<String>,
    /// Private location the generator writes readings to
    pub source: String,
    /// Public location of the published feed
    pub dest: String,
}

/// Generation job and timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobConfig {
    /// Generator program followed by its arguments
    pub command: Vec<String>,
    /// Bounded wait for the job's completion callback
    pub step_timeout_secs: u64,
    /// Overall budget for one run, from trigger to publish
    pub run_deadline_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        let feed = FeedConfig::default();
        FeedSettings {
            name: feed.name,
            location_label: feed.location_label,
            threshold: feed.threshold,
            display_tz: feed.display_tz.name().to_string(),
            footer: feed.footer,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackend::Local,
            root: PathBuf::from("tiddler-data"),
            endpoint: None,
            source: "s3://tiddler-app-private/tidal_data/tidal_data.txt".to_string(),
            dest: "s3://tiddler-app/tides-leith.ics".to_string(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            command: vec!["cat".to_string(), "s3-data/tidal_data.txt".to_string()],
            step_timeout_secs: 30,
            run_deadline_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from tiddler-config.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!(
                        path = %path.display(),
                        location = %config.feed.location_label,
                        "loaded configuration"
                    );
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "invalid config file format: {e}");
                    tracing::warn!("using default configuration (Leith, UK)");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(
                    path = %path.display(),
                    "no config file found, using default configuration (Leith, UK)"
                );
                Self::default()
            }
        }
    }

    /// Save current configuration to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        tracing::info!(path = %path.as_ref().display(), "configuration saved");
        Ok(())
    }

    /// Feed presentation with the display zone resolved.
    pub fn feed(&self) -> Result<FeedConfig, ConfigError> {
        let display_tz: Tz = self
            .feed
            .display_tz
            .parse()
            .map_err(|_| ConfigError::TimeZone(self.feed.display_tz.clone()))?;

        Ok(FeedConfig {
            name: self.feed.name.clone(),
            location_label: self.feed.location_label.clone(),
            threshold: self.feed.threshold.clone(),
            display_tz,
            footer: self.feed.footer.clone(),
        })
    }

    /// Orchestrator settings for one run.
    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        let source = self
            .storage
            .source
            .parse::<ObjectLocation>()
            .map_err(|source| ConfigError::Location {
                field: "source",
                source,
            })?;
        let dest = self
            .storage
            .dest
            .parse::<ObjectLocation>()
            .map_err(|source| ConfigError::Location {
                field: "dest",
                source,
            })?;

        Ok(RunConfig {
            source,
            dest,
            step_timeout: Duration::from_secs(self.job.step_timeout_secs),
            run_deadline: Duration::from_secs(self.job.run_deadline_secs),
            feed: self.feed()?,
        })
    }

    /// Open the configured object store.
    pub fn open_store(&self) -> Result<Arc<dyn ObjectStore>, ConfigError> {
        match self.storage.backend {
            StorageBackend::Local => Ok(Arc::new(LocalStore::new(&self.storage.root))),
            StorageBackend::Http => {
                let endpoint = self
                    .storage
                    .endpoint
                    .as_deref()
                    .ok_or(ConfigError::MissingEndpoint)?;
                let store = HttpStore::new(endpoint).map_err(ConfigError::Endpoint)?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Generator command line, checked for emptiness.
    pub fn job_command(&self) -> Result<&[String], ConfigError> {
        if self.job.command.is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        Ok(&self.job.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.feed.location_label, "Leith, UK");
        assert_eq!(config.feed.display_tz, "Europe/London");
        assert_eq!(config.job.step_timeout_secs, 30);
        assert_eq!(config.job.run_deadline_secs, 300);
        assert_eq!(config.storage.backend, StorageBackend::Local);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.feed.name, parsed.feed.name);
        assert_eq!(config.storage.dest, parsed.storage.dest);
        assert_eq!(config.job.command, parsed.job.command);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = NamedTempFile::new().unwrap();
        fs::write(
            file.path(),
            "[feed]\nlocation_label = \"Portobello, UK\"\n\n[job]\nstep_timeout_secs = 10\n",
        )
        .unwrap();

        let config = Config::load_from_path(file.path());
        assert_eq!(config.feed.location_label, "Portobello, UK");
        assert_eq!(config.feed.threshold, "3.0m");
        assert_eq!(config.job.step_timeout_secs, 10);
        assert_eq!(config.job.run_deadline_secs, 300);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        assert_eq!(config.feed.location_label, "Leith, UK");
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "this is = = not toml").unwrap();
        let config = Config::load_from_path(file.path());
        assert_eq!(config.job.step_timeout_secs, 30);
    }

    #[test]
    fn test_run_config() {
        let run = Config::default().run_config().unwrap();
        assert_eq!(run.source, ObjectLocation::new("tiddler-app-private", "tidal_data/tidal_data.txt"));
        assert_eq!(run.dest, ObjectLocation::new("tiddler-app", "tides-leith.ics"));
        assert_eq!(run.step_timeout, Duration::from_secs(30));
        assert_eq!(run.feed.display_tz, chrono_tz::Europe::London);
    }

    #[test]
    fn test_bad_time_zone_rejected() {
        let mut config = Config::default();
        config.feed.display_tz = "Mars/Olympus".to_string();
        assert!(matches!(config.feed(), Err(ConfigError::TimeZone(_))));
    }

    #[test]
    fn test_bad_location_rejected() {
        let mut config = Config::default();
        config.storage.dest = "no-key".to_string();
        assert!(matches!(
            config.run_config(),
            Err(ConfigError::Location { field: "dest", .. })
        ));
    }

    #[test]
    fn test_http_backend_needs_endpoint() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Http;
        assert!(matches!(config.open_store(), Err(ConfigError::MissingEndpoint)));

        config.storage.endpoint = Some("https://objects.example.com".to_string());
        assert!(config.open_store().is_ok());

        config.storage.endpoint = Some("objects.example.com".to_string());
        assert!(matches!(config.open_store(), Err(ConfigError::Endpoint(_))));
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut config = Config::default();
        config.job.command.clear();
        assert!(matches!(config.job_command(), Err(ConfigError::EmptyCommand)));
    }

    #[test]
    fn test_save_and_reload() {
        let file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.feed.threshold = "2.5m".to_string();
        config.save(file.path()).unwrap();

        let loaded = Config::load_from_path(file.path());
        assert_eq!(loaded.feed.threshold, "2.5m");
    }
}
