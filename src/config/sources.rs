use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "modstash.toml";
const CONFIG_ENV_VAR: &str = "MODSTASH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/modstash.toml";
const ENV_PREFIX: &str = "MODSTASH";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load(config_dir: Option<&Path>) -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path(config_dir))?;
    load_secrets(&mut config);

    Ok(config)
}

/// `--config DIR` wins, then `$MODSTASH_CONFIG`, then the default location
pub fn config_path(config_dir: Option<&Path>) -> PathBuf {
    match config_dir {
        Some(dir) => dir.join(CONFIG_FILE_NAME),
        None => env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
    }
}

/// Load secrets from environment variables into config
/// Secrets are never stored in TOML files, only in environment
fn load_secrets(config: &mut Config) {
    if let Ok(access_key) = env::var("S3_ACCESS_KEY") {
        config.storage.access_key = Some(access_key);
    }
    if let Ok(secret_key) = env::var("S3_SECRET_KEY") {
        config.storage.secret_key = Some(secret_key);
    }

    // Alternative: AWS-style environment variable names
    if config.storage.access_key.is_none() {
        if let Ok(access_key) = env::var("AWS_ACCESS_KEY_ID") {
            config.storage.access_key = Some(access_key);
        }
    }
    if config.storage.secret_key.is_none() {
        if let Ok(secret_key) = env::var("AWS_SECRET_ACCESS_KEY") {
            config.storage.secret_key = Some(secret_key);
        }
    }
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // MODSTASH__FETCH__WORKERS -> fetch.workers
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageProvider;
    use crate::loader::DuplicatePolicy;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.fetch.workers, 10);
        assert_eq!(config.storage.provider, StorageProvider::Local);
    }

    #[test]
    fn test_config_dir_takes_precedence() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(
            config_path(Some(temp_dir.path())),
            temp_dir.path().join("modstash.toml")
        );
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("modstash.toml");

        let toml_content = r#"
[log]
level = "debug"

[fetch]
proxy_url = "http://goproxy.internal:3000"
workers = 4
max_retries = 2
retry_backoff_ms = 100

[storage]
provider = "s3"
bucket = "go-modules"
region = "eu-west-1"
endpoint = "http://minio:9000"

[archive]
write_buffer = "1MB"
staging_dir = "/var/tmp/modstash"

[load]
duplicates = "reject"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.fetch.proxy_url, "http://goproxy.internal:3000");
        assert_eq!(config.fetch.workers, 4);
        assert_eq!(config.fetch.max_retries, 2);
        assert_eq!(config.storage.provider, StorageProvider::S3);
        assert_eq!(config.storage.bucket.as_deref(), Some("go-modules"));
        assert_eq!(config.archive.write_buffer.as_u64(), 1024 * 1024);
        assert_eq!(
            config.archive.staging_dir,
            Some(PathBuf::from("/var/tmp/modstash"))
        );
        assert_eq!(config.load.duplicates, DuplicatePolicy::Reject);
        // Secrets never come from the file
        assert!(config.storage.access_key.is_none());
    }

    #[test]
    fn test_numeric_write_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("modstash.toml");
        fs::write(&config_path, "[archive]\nwrite_buffer = 4096\n").unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.archive.write_buffer.as_u64(), 4096);
    }
}
