use crate::fetch::proxy::DEFAULT_PROXY_URL;
use crate::humanize::ByteSize;
use crate::loader::DuplicatePolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub load: LoadConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Module proxy client and stash pool settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,
    /// Concurrent stash tasks
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attempts per module, first one included
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxy_url: default_proxy_url(),
            workers: default_workers(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: None,
        }
    }
}

fn default_proxy_url() -> String {
    DEFAULT_PROXY_URL.to_string()
}

fn default_workers() -> usize {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    300
}

/// Storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Local,
    Memory,
    S3,
}

/// Target backend for `load`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Root directory for the local provider
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Local,
            root: default_storage_root(),
            bucket: None,
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/modules")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    /// Output buffer between the gzip encoder and the bundle file
    #[serde(default = "default_write_buffer")]
    pub write_buffer: ByteSize,
    /// Parent for staging directories (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            write_buffer: default_write_buffer(),
            staging_dir: None,
        }
    }
}

fn default_write_buffer() -> ByteSize {
    ByteSize::kib(64)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoadConfig {
    #[serde(default)]
    pub duplicates: DuplicatePolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.fetch.proxy_url, "https://proxy.golang.org");
        assert_eq!(config.fetch.workers, 10);
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.storage.provider, StorageProvider::Local);
        assert_eq!(config.archive.write_buffer.as_u64(), 64 * 1024);
        assert_eq!(config.load.duplicates, DuplicatePolicy::LastWins);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config: Config = toml::from_str(
            r#"
[fetch]
workers = 32

[storage]
provider = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.fetch.workers, 32);
        assert_eq!(config.fetch.retry_backoff_ms, 500);
        assert_eq!(config.storage.provider, StorageProvider::Memory);
        assert_eq!(config.storage.root, PathBuf::from("data/modules"));
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[storage]\nprovider = \"gcs\"\n");
        assert!(result.is_err());
    }
}
