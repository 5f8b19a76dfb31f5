//! GOPROXY protocol fetcher
//!
//! Resolves `{proxy}/{escaped module}/@v/{escaped version}.{info,mod,zip}`.

use super::{FetchError, FetchedModule, Fetcher, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_PROXY_URL: &str = "https://proxy.golang.org";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            user_agent: concat!("modstash/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// `.info` document served by a module proxy
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleInfo {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Time", default)]
    pub time: Option<DateTime<Utc>>,
}

/// Fetcher speaking the module proxy protocol
#[derive(Debug, Clone)]
pub struct ProxyFetcher {
    client: Client,
    base_url: String,
}

impl ProxyFetcher {
    pub fn new(base_url: &str, config: HttpConfig) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "{base_url}: expected http or https"
            )));
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, module: &str, version: &str, ext: &str) -> Result<String> {
        Ok(format!(
            "{}/{}/@v/{}.{}",
            self.base_url,
            escape_path(module)?,
            escape_version(version)?,
            ext
        ))
    }

    async fn get(&self, url: &str, module: &str, version: &str) -> Result<Bytes> {
        debug!(url, "Starting download");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(FetchError::NotFound {
                module: module.to_string(),
                version: version.to_string(),
            });
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Server {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Rejected {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::RequestFailed(format!("Failed to read body: {e}"))
            }
        })?;

        debug!(url, size = bytes.len(), "Download completed");
        Ok(bytes)
    }
}

#[async_trait]
impl Fetcher for ProxyFetcher {
    async fn fetch(&self, module: &str, version: &str) -> Result<FetchedModule> {
        let info = self.get(&self.url(module, version, "info")?, module, version).await?;
        let parsed: ModuleInfo = serde_json::from_slice(&info)
            .map_err(|e| FetchError::InvalidInfo(format!("{module}@{version}: {e}")))?;
        if parsed.version != version {
            return Err(FetchError::InvalidInfo(format!(
                "{module}@{version}: proxy reported version {}",
                parsed.version
            )));
        }

        let manifest = self.get(&self.url(module, version, "mod")?, module, version).await?;
        let source = self.get(&self.url(module, version, "zip")?, module, version).await?;

        debug!(
            module,
            version,
            published = ?parsed.time,
            zip_bytes = source.len(),
            "Fetched module version"
        );

        Ok(FetchedModule {
            manifest,
            source,
            info,
        })
    }
}

/// Case-encode a module path: each uppercase letter becomes `!` + lowercase
pub fn escape_path(path: &str) -> Result<String> {
    let bad_segment = path
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if path.is_empty() || bad_segment {
        return Err(FetchError::InvalidModule(path.to_string()));
    }
    escape(path)
}

/// Case-encode a version string
pub fn escape_version(version: &str) -> Result<String> {
    if version.is_empty() || version.contains('/') || version == "." || version == ".." {
        return Err(FetchError::InvalidModule(version.to_string()));
    }
    escape(version)
}

fn escape(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        if c == '!' || !c.is_ascii() || c.is_ascii_control() || c.is_ascii_whitespace() {
            return Err(FetchError::InvalidModule(value.to_string()));
        }
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    Ok(out)
}
