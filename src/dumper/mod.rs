//! Manifest-driven bundle export
//!
//! Parses the manifest, stashes every required module version into a
//! staging directory through a local [`ObjectModuleStore`], then packs that
//! directory into `<output>/<staging base name>.tar.gz`. Modules that fail
//! all their attempts are reported but do not prevent the archive.

use crate::archive::{self, ArchiveError};
use crate::fetch::Fetcher;
use crate::humanize::ByteSize;
use crate::manifest::{Manifest, ManifestError};
use crate::observability::Metrics;
use crate::stash::{PoolConfig, StashOutcome, StashPool, Stasher};
use crate::staging::{self, DUMP_PREFIX};
use crate::storage::{ObjectModuleStore, StorageError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("failed to create staging directory: {0}")]
    Staging(#[source] std::io::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("failed to open staging store: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("dump cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Settings for one dump run
#[derive(Debug, Clone, bon::Builder)]
pub struct DumpOptions {
    /// Directory holding the `go.mod` to export
    #[builder(into)]
    pub manifest_dir: PathBuf,
    /// Where the bundle is written; created when missing
    #[builder(into, default = PathBuf::from("."))]
    pub output_dir: PathBuf,
    #[builder(default)]
    pub pool: PoolConfig,
    #[builder(default = ByteSize::kib(64))]
    pub write_buffer: ByteSize,
    #[builder(into)]
    pub staging_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct DumpReport {
    pub archive: PathBuf,
    /// One per required module, in manifest order
    pub outcomes: Vec<StashOutcome>,
}

impl DumpReport {
    pub fn fetched(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.fetched()
    }

    pub fn failures(&self) -> impl Iterator<Item = &StashOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded)
    }
}

pub async fn dump_modules(
    options: &DumpOptions,
    fetcher: Arc<dyn Fetcher>,
    cancel: &CancellationToken,
) -> Result<DumpReport, DumpError> {
    let manifest_dir = absolute(&options.manifest_dir)?;
    let manifest = Manifest::from_dir(&manifest_dir)?;
    info!(
        module = %manifest.module,
        requires = manifest.requires.len(),
        "Dumping dependencies"
    );

    let staging = staging::create(DUMP_PREFIX, options.staging_dir.as_deref())
        .map_err(DumpError::Staging)?;
    let store = ObjectModuleStore::local(staging.path())?;

    let metrics = Arc::new(Metrics::new());
    let pool = StashPool::new(
        Stasher::new(fetcher, Arc::new(store)),
        options.pool.clone(),
    )
    .with_metrics(Arc::clone(&metrics));
    info!(
        staging = %staging.path().display(),
        workers = pool.config().max_parallel_tasks,
        max_retries = pool.config().max_retries_per_task,
        "Stashing modules"
    );

    let outcomes = pool.run(manifest.requires, cancel).await;
    if cancel.is_cancelled() {
        return Err(DumpError::Cancelled);
    }

    std::fs::create_dir_all(&options.output_dir).map_err(|source| DumpError::Io {
        path: options.output_dir.clone(),
        source,
    })?;

    let src = staging.path().to_path_buf();
    let dst = options.output_dir.clone();
    let buffer = options.write_buffer.as_usize();
    debug!(write_buffer = %options.write_buffer, "Packing staging directory");
    let archive = tokio::task::spawn_blocking(move || archive::pack_dir(&src, &dst, buffer)).await??;

    staging::cleanup(staging);

    let report = DumpReport { archive, outcomes };
    let counts = metrics.snapshot();
    info!(
        archive = %report.archive.display(),
        fetched = counts.modules_fetched,
        failed = counts.modules_failed,
        "Dump finished"
    );
    Ok(report)
}

fn absolute(path: &Path) -> Result<PathBuf, DumpError> {
    std::path::absolute(path).map_err(|source| DumpError::Io {
        path: path.to_path_buf(),
        source,
    })
}
