//! Tracing setup and run counters

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Level used until the configuration has been read
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Handle to the filter installed by [`init_tracing`]
pub struct TracingHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl TracingHandle {
    /// Switch to the configured level; a `RUST_LOG` filter is kept as is
    pub fn set_level(&self, level: &str) {
        if self.from_env {
            return;
        }
        let filter = match EnvFilter::try_new(level) {
            Ok(filter) => filter,
            Err(err) => {
                tracing::warn!(level, error = %err, "Ignoring invalid log level");
                return;
            }
        };
        if let Err(err) = self.filter.reload(filter) {
            tracing::debug!(error = %err, "Log filter not reloaded");
        }
    }
}

/// Install the global fmt subscriber
///
/// `RUST_LOG` wins when set; otherwise `level` (e.g. "info", "debug")
/// applies to every target until [`TracingHandle::set_level`] replaces it.
pub fn init_tracing(level: &str) -> TracingHandle {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(level), false),
    };
    let (filter, handle) = reload::Layer::new(filter);
    // A subscriber may already be installed (tests, embedding)
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();

    TracingHandle {
        filter: handle,
        from_env,
    }
}

/// Counters shared by the tasks of one dump or load run
#[derive(Debug, Default)]
pub struct Metrics {
    modules_fetched: AtomicU64,
    modules_failed: AtomicU64,
    modules_saved: AtomicU64,
    modules_conflicted: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the updated count
    pub fn module_fetched(&self) -> u64 {
        tracing::trace!(counter = "modules_fetched", "Metric incremented");
        self.modules_fetched.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the updated count
    pub fn module_failed(&self) -> u64 {
        tracing::trace!(counter = "modules_failed", "Metric incremented");
        self.modules_failed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn module_saved(&self) {
        self.modules_saved.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "modules_saved", "Metric incremented");
    }

    pub fn module_conflicted(&self) {
        self.modules_conflicted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "modules_conflicted", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            modules_fetched: self.modules_fetched.load(Ordering::Relaxed),
            modules_failed: self.modules_failed.load(Ordering::Relaxed),
            modules_saved: self.modules_saved.load(Ordering::Relaxed),
            modules_conflicted: self.modules_conflicted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub modules_fetched: u64,
    pub modules_failed: u64,
    pub modules_saved: u64,
    pub modules_conflicted: u64,
}
