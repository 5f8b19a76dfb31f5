//! Fetch-then-persist of module versions
//!
//! [`Stasher`] performs one stash (fetch a module version, save it into a
//! [`ModuleStore`]); [`StashPool`] runs many of them with bounded
//! parallelism and per-task retry.

pub mod pool;

pub use pool::{PoolConfig, StashOutcome, StashPool};

use crate::fetch::{FetchError, Fetcher};
use crate::manifest::DependencySpec;
use crate::storage::{ArtifactSet, ModuleStore, StorageError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StashError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("save failed: {0}")]
    Storage(#[from] StorageError),

    #[error("cancelled")]
    Cancelled,

    #[error("stash task aborted: {0}")]
    Aborted(String),
}

impl StashError {
    /// Whether the pool should schedule another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            StashError::Fetch(err) => err.is_transient(),
            StashError::Storage(StorageError::InvalidKey(_)) => false,
            StashError::Storage(_) => true,
            StashError::Cancelled | StashError::Aborted(_) => false,
        }
    }
}

/// Combines a fetcher with the store that receives its results
#[derive(Clone)]
pub struct Stasher {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn ModuleStore>,
}

impl Stasher {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<dyn ModuleStore>) -> Self {
        Self { fetcher, store }
    }

    /// Fetch `spec` and persist it
    ///
    /// A version that is already stored counts as stashed.
    pub async fn stash(&self, spec: &DependencySpec) -> Result<(), StashError> {
        let fetched = self.fetcher.fetch(&spec.path, &spec.version).await?;

        let artifacts = ArtifactSet::from_bytes(
            spec.path.clone(),
            spec.version.clone(),
            fetched.manifest,
            fetched.source,
            fetched.info,
        );

        match self.store.save(artifacts).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_conflict() => {
                tracing::debug!(module = %spec.path, version = %spec.version, "Already stashed");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
