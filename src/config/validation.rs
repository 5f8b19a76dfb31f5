use super::models::{Config, StorageProvider};
use reqwest::Url;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid log level '{level}': {reason}")]
    InvalidLogLevel { level: String, reason: String },

    #[error("Invalid proxy URL '{url}', expected an http:// or https:// URL")]
    InvalidProxyUrl { url: String },

    #[error("fetch.{field} must be positive")]
    ZeroFetchSetting { field: &'static str },

    #[error("Storage provider is local but storage.root is empty")]
    MissingStorageRoot,

    #[error("Storage provider is S3 but storage.bucket is not set")]
    MissingBucket,

    #[error("Storage provider is S3 but missing credentials (access_key or secret_key)")]
    MissingS3Credentials,

    #[error("archive.write_buffer must be positive")]
    ZeroWriteBuffer,
}

/// Validate the settings every command depends on
///
/// Storage settings only matter to `load` and are checked by
/// [`validate_storage`] when the backend is opened.
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_log(config)?;
    validate_fetch(config)?;
    validate_archive(config)?;
    Ok(())
}

fn validate_log(config: &Config) -> Result<(), ValidationError> {
    EnvFilter::try_new(&config.log.level).map_err(|e| ValidationError::InvalidLogLevel {
        level: config.log.level.clone(),
        reason: e.to_string(),
    })?;
    Ok(())
}

fn validate_fetch(config: &Config) -> Result<(), ValidationError> {
    let fetch = &config.fetch;

    let url_ok = Url::parse(&fetch.proxy_url)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false);
    if !url_ok {
        return Err(ValidationError::InvalidProxyUrl {
            url: fetch.proxy_url.clone(),
        });
    }

    if fetch.workers == 0 {
        return Err(ValidationError::ZeroFetchSetting { field: "workers" });
    }
    if fetch.max_retries == 0 {
        return Err(ValidationError::ZeroFetchSetting {
            field: "max_retries",
        });
    }
    if fetch.request_timeout_secs == 0 {
        return Err(ValidationError::ZeroFetchSetting {
            field: "request_timeout_secs",
        });
    }

    Ok(())
}

pub fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    let storage = &config.storage;
    match storage.provider {
        StorageProvider::Local if storage.root.as_os_str().is_empty() => {
            Err(ValidationError::MissingStorageRoot)
        }
        StorageProvider::S3 if storage.bucket.as_deref().unwrap_or("").is_empty() => {
            Err(ValidationError::MissingBucket)
        }
        StorageProvider::S3 if storage.access_key.is_none() || storage.secret_key.is_none() => {
            Err(ValidationError::MissingS3Credentials)
        }
        _ => Ok(()),
    }
}

fn validate_archive(config: &Config) -> Result<(), ValidationError> {
    if config.archive.write_buffer.as_u64() == 0 {
        return Err(ValidationError::ZeroWriteBuffer);
    }
    Ok(())
}
