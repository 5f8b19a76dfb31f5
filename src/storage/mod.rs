//! Storage backend contract for module versions
//!
//! A backend persists the artifact triplet of one module version (manifest,
//! source archive, metadata) and reports [`StorageError::AlreadyExists`]
//! when that version is already present, so callers can treat re-imports
//! as a no-op.

mod object;

pub use object::{ObjectModuleStore, S3Settings};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;

/// File names inside one module-version directory
pub const MANIFEST_FILE: &str = "go.mod";
pub const SOURCE_FILE: &str = "source.zip";

/// `<version>.info`
pub fn info_file(version: &str) -> String {
    format!("{version}.info")
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{module}@{version} already exists")]
    AlreadyExists { module: String, version: String },

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("failed reading source archive: {0}")]
    Source(#[source] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
}

impl StorageError {
    /// Conflict signal: the version is already stored
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::AlreadyExists { .. })
    }
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Streaming source archive
pub type SourceReader = Box<dyn AsyncRead + Send + Unpin>;

/// The three-part payload of one published module version
pub struct ArtifactSet {
    pub module: String,
    pub version: String,
    pub manifest: Bytes,
    pub source: SourceReader,
    pub info: Bytes,
}

impl ArtifactSet {
    /// Build a set whose source archive is already in memory
    pub fn from_bytes(
        module: impl Into<String>,
        version: impl Into<String>,
        manifest: Bytes,
        source: Bytes,
        info: Bytes,
    ) -> Self {
        Self {
            module: module.into(),
            version: version.into(),
            manifest,
            source: Box::new(std::io::Cursor::new(source)),
            info,
        }
    }
}

impl std::fmt::Debug for ArtifactSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactSet")
            .field("module", &self.module)
            .field("version", &self.version)
            .field("manifest_len", &self.manifest.len())
            .field("info_len", &self.info.len())
            .finish_non_exhaustive()
    }
}

/// Persistence for module versions
///
/// Implementations must be safe to call concurrently for distinct
/// (module, version) keys.
#[async_trait]
pub trait ModuleStore: Send + Sync {
    /// Persist one module version, failing with `AlreadyExists` on conflict
    async fn save(&self, artifacts: ArtifactSet) -> Result<()>;

    async fn exists(&self, module: &str, version: &str) -> Result<bool>;
}
