//! `object_store`-backed module storage
//!
//! Layout mirrors the on-disk bundle layout, so a `LocalFileSystem` store
//! rooted at a staging directory produces a tree that can be packed as-is:
//!
//! ```text
//! {module}/{version}/go.mod
//! {module}/{version}/source.zip
//! {module}/{version}/{version}.info
//! ```

use super::{
    ArtifactSet, MANIFEST_FILE, ModuleStore, Result, SOURCE_FILE, SourceReader, StorageError,
    info_file,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ObjectStore, WriteMultipart, path::Path as StoragePath};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;
const MAX_INFLIGHT_PARTS: usize = 4;

/// Storage client wrapping object_store
#[derive(Clone)]
pub struct ObjectModuleStore {
    store: Arc<dyn ObjectStore>,
    label: String,
}

impl std::fmt::Debug for ObjectModuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectModuleStore")
            .field("label", &self.label)
            .finish()
    }
}

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

impl ObjectModuleStore {
    /// Create a store over any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>, label: impl Into<String>) -> Self {
        Self {
            store,
            label: label.into(),
        }
    }

    /// Filesystem store rooted at an existing directory
    ///
    /// Directories emptied by a delete are removed up to `root`.
    pub fn local(root: &Path) -> Result<Self> {
        let store = LocalFileSystem::new_with_prefix(root)?.with_automatic_cleanup(true);
        Ok(Self::new(Arc::new(store), root.display().to_string()))
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory")
    }

    pub fn s3(settings: S3Settings) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&settings.bucket)
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_key);

        if let Some(region) = &settings.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &settings.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder.build()?;
        Ok(Self::new(Arc::new(store), format!("s3://{}", settings.bucket)))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Every stored (module, version) pair, sorted
    ///
    /// A version counts as stored once its `.info` object exists.
    pub async fn catalog(&self) -> Result<Vec<(String, String)>> {
        let objects: Vec<_> = self.store.list(None).try_collect().await?;

        let mut entries: Vec<(String, String)> = objects
            .iter()
            .filter_map(|meta| {
                let parts: Vec<String> = meta
                    .location
                    .parts()
                    .map(|part| part.as_ref().to_string())
                    .collect();
                let (file, rest) = parts.split_last()?;
                let (version, module) = rest.split_last()?;
                if module.is_empty() || *file != info_file(version) {
                    return None;
                }
                Some((module.join("/"), version.clone()))
            })
            .collect();

        entries.sort();
        entries.dedup();
        Ok(entries)
    }

    async fn upload_source(&self, key: &StoragePath, mut source: SourceReader) -> Result<u64> {
        let upload = self.store.put_multipart(key).await?;
        let mut writer = WriteMultipart::new(upload);
        let mut buf = vec![0u8; UPLOAD_CHUNK_BYTES];
        let mut total = 0u64;

        loop {
            let read = match source.read(&mut buf).await {
                Ok(read) => read,
                Err(err) => {
                    writer.abort().await?;
                    return Err(StorageError::Source(err));
                }
            };
            if read == 0 {
                break;
            }
            writer.wait_for_capacity(MAX_INFLIGHT_PARTS).await?;
            writer.write(&buf[..read]);
            total += read as u64;
        }

        writer.finish().await?;
        Ok(total)
    }

    /// Best-effort removal of a partially written version
    async fn discard(&self, keys: &[StoragePath]) {
        for key in keys {
            match self.store.delete(key).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Failed to remove partial object");
                }
            }
        }
    }
}

fn version_dir(module: &str, version: &str) -> Result<String> {
    let valid = |s: &str| !s.is_empty() && s.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..");
    if !valid(module) || !valid(version) || version.contains('/') {
        return Err(StorageError::InvalidKey(format!("{module}@{version}")));
    }
    Ok(format!("{module}/{version}"))
}

/// Parts are taken verbatim: `Path::from` would percent-encode characters
/// such as `~` that are legal in module paths
fn key(dir: &str, file: &str) -> Result<StoragePath> {
    StoragePath::parse(format!("{dir}/{file}"))
        .map_err(|_| StorageError::InvalidKey(format!("{dir}/{file}")))
}

#[async_trait]
impl ModuleStore for ObjectModuleStore {
    async fn save(&self, artifacts: ArtifactSet) -> Result<()> {
        let ArtifactSet {
            module,
            version,
            manifest,
            source,
            info,
        } = artifacts;

        let dir = version_dir(&module, &version)?;
        let manifest_key = key(&dir, MANIFEST_FILE)?;
        let source_key = key(&dir, SOURCE_FILE)?;
        let info_key = key(&dir, &info_file(&version))?;

        if self.exists(&module, &version).await? {
            return Err(StorageError::AlreadyExists { module, version });
        }

        let written = async {
            self.store.put(&manifest_key, manifest.into()).await?;
            let source_bytes = self.upload_source(&source_key, source).await?;
            // .info goes last: its presence marks a complete record
            self.store.put(&info_key, info.into()).await?;
            Ok::<_, StorageError>(source_bytes)
        }
        .await;

        let source_bytes = match written {
            Ok(bytes) => bytes,
            Err(err) => {
                self.discard(&[manifest_key, source_key, info_key]).await;
                return Err(err);
            }
        };

        tracing::info!(
            module = %module,
            version = %version,
            source_bytes,
            store = %self.label,
            "Saved module version"
        );
        Ok(())
    }

    async fn exists(&self, module: &str, version: &str) -> Result<bool> {
        let dir = version_dir(module, version)?;
        match self.store.head(&key(&dir, &info_file(version))?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
