//! Module fetchers
//!
//! A [`Fetcher`] retrieves the manifest / source archive / metadata triplet
//! for one module version. Fetching is idempotent and may fail transiently;
//! retry policy lives in the stash pool, not here.

pub mod proxy;

pub use proxy::{HttpConfig, ProxyFetcher, escape_path, escape_version};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("server error {status} for {url}")]
    Server { status: u16, url: String },

    #[error("request for {url} rejected with status {status}")]
    Rejected { status: u16, url: String },

    #[error("{module}@{version} not found")]
    NotFound { module: String, version: String },

    #[error("invalid module path or version: {0}")]
    InvalidModule(String),

    #[error("invalid module metadata: {0}")]
    InvalidInfo(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether another attempt could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::RequestFailed(_) | FetchError::Timeout | FetchError::Server { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Raw artifacts of one module version as returned by a fetcher
#[derive(Debug, Clone)]
pub struct FetchedModule {
    pub manifest: Bytes,
    pub source: Bytes,
    pub info: Bytes,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, module: &str, version: &str) -> Result<FetchedModule>;
}
