//! Bundle import
//!
//! Unpacks every bundle found in a directory into one staging root,
//! discovers module-version leaves and saves each into a [`ModuleStore`].
//! Units are processed in sorted order; a version the store already holds
//! counts as loaded, any other storage error stops the run.

pub mod scan;

pub use scan::{Discovery, DuplicateModule, DuplicatePolicy, ModuleUnit, ScanError, scan_dumps};

use crate::archive::{self, ARCHIVE_SUFFIX, ArchiveError};
use crate::observability::Metrics;
use crate::staging::{self, DUMP_PREFIX, LOAD_PREFIX};
use crate::storage::{ArtifactSet, MANIFEST_FILE, ModuleStore, SOURCE_FILE, StorageError, info_file};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to create staging directory: {0}")]
    Staging(#[source] std::io::Error),

    #[error("invalid bundle pattern: {0}")]
    Pattern(String),

    #[error("no {DUMP_PREFIX}*{ARCHIVE_SUFFIX} bundles found in {dir}")]
    NoBundles { dir: PathBuf },

    #[error("bundle {bundle}: {source}")]
    Archive {
        bundle: PathBuf,
        #[source]
        source: ArchiveError,
    },

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("{module}@{version} is incomplete: missing {file}")]
    IncompleteModule {
        module: String,
        version: String,
        file: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed saving {module}@{version}: {source}")]
    Storage {
        module: String,
        version: String,
        #[source]
        source: StorageError,
    },

    #[error("load cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Settings for one load run
#[derive(Debug, Clone, bon::Builder)]
pub struct LoadOptions {
    /// Directory searched for bundle archives
    #[builder(into)]
    pub archive_dir: PathBuf,
    #[builder(default)]
    pub duplicates: DuplicatePolicy,
    /// Parent for the staging directory (system temp dir when unset)
    #[builder(into)]
    pub staging_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub bundles: usize,
    pub saved: u64,
    pub conflicts: u64,
    pub duplicates: Vec<DuplicateModule>,
}

/// Bundle archives in `dir`, sorted by path
pub fn find_bundles(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let pattern = format!(
        "{}/{}*{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        DUMP_PREFIX,
        ARCHIVE_SUFFIX
    );

    let mut bundles = glob::glob(&pattern)
        .map_err(|e| LoadError::Pattern(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            let path = e.path().to_path_buf();
            LoadError::Io {
                path,
                source: e.into(),
            }
        })?;

    bundles.retain(|path| path.is_file());
    bundles.sort();
    Ok(bundles)
}

/// Import every bundle in `options.archive_dir` into `store`
pub async fn load_modules(
    options: &LoadOptions,
    store: &dyn ModuleStore,
    cancel: &CancellationToken,
) -> Result<LoadReport, LoadError> {
    let bundles = find_bundles(&options.archive_dir)?;
    if bundles.is_empty() {
        return Err(LoadError::NoBundles {
            dir: options.archive_dir.clone(),
        });
    }

    let staging = staging::create(LOAD_PREFIX, options.staging_dir.as_deref())
        .map_err(LoadError::Staging)?;
    let root = staging.path().to_path_buf();

    for bundle in &bundles {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        info!(bundle = %bundle.display(), "Unpacking bundle");

        let (archive_path, dest) = (bundle.clone(), root.clone());
        tokio::task::spawn_blocking(move || archive::unpack(&archive_path, &dest))
            .await?
            .map_err(|source| LoadError::Archive {
                bundle: bundle.clone(),
                source,
            })?;
    }

    let policy = options.duplicates;
    let scan_root = root.clone();
    let discovery = tokio::task::spawn_blocking(move || scan_dumps(&scan_root, policy)).await??;

    let metrics = Metrics::new();
    for unit in &discovery.units {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        info!(module = %unit.module, version = %unit.version, "Saving");

        match load_unit(store, unit).await {
            Ok(()) => metrics.module_saved(),
            Err(LoadError::Storage { source, .. }) if source.is_conflict() => {
                info!(module = %unit.module, version = %unit.version, "Already present, skipping");
                metrics.module_conflicted();
            }
            Err(err) => return Err(err),
        }
    }

    for duplicate in &discovery.duplicates {
        warn!(
            module = %duplicate.replacement.module,
            loaded = %duplicate.replacement.version,
            skipped = %duplicate.previous.version,
            "Duplicate module path across bundles"
        );
    }

    staging::cleanup(staging);

    let counts = metrics.snapshot();
    let report = LoadReport {
        bundles: bundles.len(),
        saved: counts.modules_saved,
        conflicts: counts.modules_conflicted,
        duplicates: discovery.duplicates,
    };
    info!(
        bundles = report.bundles,
        saved = report.saved,
        conflicts = report.conflicts,
        duplicates = report.duplicates.len(),
        "Load finished"
    );
    Ok(report)
}

/// Read the three artifacts of one leaf and hand them to the store
async fn load_unit(store: &dyn ModuleStore, unit: &ModuleUnit) -> Result<(), LoadError> {
    let manifest = read_required(unit, MANIFEST_FILE).await?;
    let info = read_required(unit, &info_file(&unit.version)).await?;

    let source_path = unit.dir.join(SOURCE_FILE);
    let source = tokio::fs::File::open(&source_path)
        .await
        .map_err(|err| missing_or_io(unit, SOURCE_FILE, source_path.clone(), err))?;

    let artifacts = ArtifactSet {
        module: unit.module.clone(),
        version: unit.version.clone(),
        manifest: Bytes::from(manifest),
        source: Box::new(source),
        info: Bytes::from(info),
    };

    store
        .save(artifacts)
        .await
        .map_err(|source| LoadError::Storage {
            module: unit.module.clone(),
            version: unit.version.clone(),
            source,
        })
}

async fn read_required(unit: &ModuleUnit, file: &str) -> Result<Vec<u8>, LoadError> {
    let path = unit.dir.join(file);
    tokio::fs::read(&path)
        .await
        .map_err(|err| missing_or_io(unit, file, path.clone(), err))
}

fn missing_or_io(unit: &ModuleUnit, file: &str, path: PathBuf, err: std::io::Error) -> LoadError {
    if err.kind() == std::io::ErrorKind::NotFound {
        LoadError::IncompleteModule {
            module: unit.module.clone(),
            version: unit.version.clone(),
            file: file.to_string(),
        }
    } else {
        LoadError::Io { path, source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_bundles_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("modstash_dump_b.tar.gz"), b"").unwrap();
        fs::write(dir.join("modstash_dump_a.tar.gz"), b"").unwrap();
        fs::write(dir.join("other.tar.gz"), b"").unwrap();
        fs::write(dir.join("modstash_dump_c.zip"), b"").unwrap();
        fs::create_dir_all(dir.join("modstash_dump_dir.tar.gz")).unwrap();

        let bundles = find_bundles(dir).unwrap();
        assert_eq!(
            bundles,
            vec![dir.join("modstash_dump_a.tar.gz"), dir.join("modstash_dump_b.tar.gz")]
        );
    }

    #[tokio::test]
    async fn test_no_bundles_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let options = LoadOptions::builder().archive_dir(temp_dir.path()).build();
        let store = crate::storage::ObjectModuleStore::in_memory();

        let result = load_modules(&options, &store, &CancellationToken::new()).await;
        assert!(matches!(result, Err(LoadError::NoBundles { .. })));
    }

    #[tokio::test]
    async fn test_incomplete_leaf_is_a_structure_error() {
        let temp_dir = TempDir::new().unwrap();
        let leaf = temp_dir.path().join("example.org/x/v1.0.0");
        fs::create_dir_all(&leaf).unwrap();
        fs::write(leaf.join("go.mod"), b"module example.org/x").unwrap();
        fs::write(leaf.join("v1.0.0.info"), b"{}").unwrap();

        let unit = ModuleUnit {
            module: "example.org/x".to_string(),
            version: "v1.0.0".to_string(),
            dir: leaf,
        };
        let store = crate::storage::ObjectModuleStore::in_memory();

        let result = load_unit(&store, &unit).await;
        assert!(matches!(
            result,
            Err(LoadError::IncompleteModule { ref file, .. }) if file == "source.zip"
        ));
        assert!(!store.exists("example.org/x", "v1.0.0").await.unwrap());
    }
}
