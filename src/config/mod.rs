//! Configuration management for modstash
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use modstash::config::Config;
//!
//! let config = Config::load(None).expect("Failed to load configuration");
//! println!("Fetching from: {}", config.fetch.proxy_url);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `MODSTASH__<section>__<key>`
//!
//! Examples:
//! - `MODSTASH__FETCH__WORKERS=32`
//! - `MODSTASH__FETCH__PROXY_URL=http://athens.internal:3000`
//! - `MODSTASH__ARCHIVE__WRITE_BUFFER=1MB`
//!
//! # Configuration File
//!
//! `--config DIR` loads `DIR/modstash.toml`. Without it, the path comes from
//! the `MODSTASH_CONFIG` environment variable, defaulting to
//! `config/modstash.toml`.

mod models;
mod sources;
mod validation;

// Re-export public types
pub use crate::humanize::ByteSize;
pub use models::{
    ArchiveConfig, Config, FetchConfig, LoadConfig, LogConfig, StorageConfig, StorageProvider,
};
pub use sources::CONFIG_FILE_NAME;
pub use validation::ValidationError;

use crate::dumper::DumpOptions;
use crate::fetch::HttpConfig;
use crate::loader::LoadOptions;
use crate::stash::PoolConfig;
use crate::storage::{ObjectModuleStore, S3Settings, StorageError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Failed to open storage: {0}")]
    Storage(#[from] StorageError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`MODSTASH__*`)
    /// 2. TOML file (`<config_dir>/modstash.toml`, `$MODSTASH_CONFIG` or
    ///    `config/modstash.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation.
    pub fn load(config_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let config = sources::load(config_dir)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::builder()
            .max_parallel_tasks(self.fetch.workers)
            .max_retries_per_task(self.fetch.max_retries)
            .retry_backoff(Duration::from_millis(self.fetch.retry_backoff_ms))
            .build()
    }

    pub fn http_config(&self) -> HttpConfig {
        let mut http = HttpConfig {
            connect_timeout: Duration::from_secs(self.fetch.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.fetch.request_timeout_secs),
            ..HttpConfig::default()
        };
        if let Some(user_agent) = &self.fetch.user_agent {
            http.user_agent = user_agent.clone();
        }
        http
    }

    pub fn dump_options(&self, manifest_dir: PathBuf, output_dir: PathBuf) -> DumpOptions {
        DumpOptions::builder()
            .manifest_dir(manifest_dir)
            .output_dir(output_dir)
            .pool(self.pool_config())
            .write_buffer(self.archive.write_buffer)
            .maybe_staging_dir(self.archive.staging_dir.clone())
            .build()
    }

    pub fn load_options(&self, archive_dir: PathBuf) -> LoadOptions {
        LoadOptions::builder()
            .archive_dir(archive_dir)
            .duplicates(self.load.duplicates)
            .maybe_staging_dir(self.archive.staging_dir.clone())
            .build()
    }

    /// Open the backend `load` writes into
    ///
    /// Storage settings are validated here rather than in [`Config::load`],
    /// so `dump` runs without storage credentials.
    pub fn build_store(&self) -> Result<ObjectModuleStore, ConfigError> {
        validation::validate_storage(self)?;
        let storage = &self.storage;
        let store = match storage.provider {
            StorageProvider::Memory => ObjectModuleStore::in_memory(),
            StorageProvider::Local => {
                std::fs::create_dir_all(&storage.root).map_err(StorageError::Source)?;
                ObjectModuleStore::local(&storage.root)?
            }
            StorageProvider::S3 => ObjectModuleStore::s3(S3Settings {
                bucket: storage.bucket.clone().unwrap_or_default(),
                region: storage.region.clone(),
                endpoint: storage.endpoint.clone(),
                access_key: storage.access_key.clone().unwrap_or_default(),
                secret_key: storage.secret_key.clone().unwrap_or_default(),
            })?,
        };
        Ok(store)
    }
}
