//! Bounded-parallel stash runner
//!
//! Every spec gets its own task; a semaphore caps how many run at once and
//! the rest wait for a free slot. Tasks are tracked independently, so a
//! module that exhausts its retries is recorded in its own outcome and never
//! cancels its siblings. Outcomes come back in input order.

use super::{StashError, Stasher};
use crate::manifest::DependencySpec;
use crate::observability::Metrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Parallelism and retry bounds for one dump run
#[derive(Debug, Clone, bon::Builder)]
pub struct PoolConfig {
    #[builder(default = 10)]
    pub max_parallel_tasks: usize,
    #[builder(default = 5)]
    pub max_retries_per_task: u32,
    /// Delay before the second attempt; doubles for each further attempt
    #[builder(default = Duration::from_millis(500))]
    pub retry_backoff: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub max_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PoolConfig {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Result of stashing one spec
#[derive(Debug)]
pub struct StashOutcome {
    pub path: String,
    pub version: String,
    pub attempts: u32,
    pub succeeded: bool,
    pub last_error: Option<StashError>,
}

impl StashOutcome {
    fn success(spec: &DependencySpec, attempts: u32) -> Self {
        Self {
            path: spec.path.clone(),
            version: spec.version.clone(),
            attempts,
            succeeded: true,
            last_error: None,
        }
    }

    fn failure(spec: &DependencySpec, attempts: u32, error: StashError) -> Self {
        Self {
            path: spec.path.clone(),
            version: spec.version.clone(),
            attempts,
            succeeded: false,
            last_error: Some(error),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.last_error, Some(StashError::Cancelled))
    }
}

/// Runs stash tasks with bounded parallelism and per-task retry
pub struct StashPool {
    stasher: Stasher,
    config: PoolConfig,
    metrics: Arc<Metrics>,
}

impl StashPool {
    pub fn new(stasher: Stasher, config: PoolConfig) -> Self {
        Self {
            stasher,
            config,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Stash every spec; returns exactly one outcome per spec, in input order
    pub async fn run(
        &self,
        specs: Vec<DependencySpec>,
        cancel: &CancellationToken,
    ) -> Vec<StashOutcome> {
        let total = specs.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tasks.max(1)));
        let mut tasks = JoinSet::new();
        let mut index_of = HashMap::with_capacity(total);

        for (idx, spec) in specs.iter().cloned().enumerate() {
            info!(module = %spec.path, version = %spec.version, "Fetching");
            let task = StashTask {
                stasher: self.stasher.clone(),
                config: self.config.clone(),
                cancel: cancel.clone(),
                semaphore: Arc::clone(&semaphore),
                metrics: Arc::clone(&self.metrics),
                total,
            };
            let handle = tasks.spawn(task.run(spec));
            index_of.insert(handle.id(), idx);
        }

        let mut outcomes: Vec<Option<StashOutcome>> = (0..total).map(|_| None).collect();

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Some(&idx) = index_of.get(&id) {
                        outcomes[idx] = Some(outcome);
                    }
                }
                Err(err) => {
                    if let Some(&idx) = index_of.get(&err.id()) {
                        let spec = &specs[idx];
                        error!(module = %spec.path, version = %spec.version, error = %err, "Stash task aborted");
                        self.metrics.module_failed();
                        outcomes[idx] = Some(StashOutcome::failure(
                            spec,
                            0,
                            StashError::Aborted(err.to_string()),
                        ));
                    }
                }
            }
        }

        outcomes
            .into_iter()
            .zip(specs.iter())
            .map(|(outcome, spec)| {
                outcome.unwrap_or_else(|| {
                    StashOutcome::failure(spec, 0, StashError::Aborted("no result".to_string()))
                })
            })
            .collect()
    }
}

struct StashTask {
    stasher: Stasher,
    config: PoolConfig,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
    metrics: Arc<Metrics>,
    total: usize,
}

impl StashTask {
    async fn run(self, spec: DependencySpec) -> StashOutcome {
        let acquired = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        };
        let Some(_permit) = acquired else {
            self.metrics.module_failed();
            return StashOutcome::failure(&spec, 0, StashError::Cancelled);
        };

        let max_attempts = self.config.max_retries_per_task.max(1);
        let mut attempts = 0u32;
        let mut last_error = StashError::Cancelled;

        while attempts < max_attempts {
            if self.cancel.is_cancelled() {
                last_error = StashError::Cancelled;
                break;
            }
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(StashError::Cancelled),
                result = self.stasher.stash(&spec) => result,
            };

            let err = match result {
                Ok(()) => {
                    let fetched = self.metrics.module_fetched();
                    info!(
                        module = %spec.path,
                        version = %spec.version,
                        attempts,
                        "Fetched ({}/{})",
                        fetched,
                        self.total
                    );
                    return StashOutcome::success(&spec, attempts);
                }
                Err(err) => err,
            };

            let retry = err.is_retryable() && attempts < max_attempts;
            if !retry {
                last_error = err;
                break;
            }

            let delay = self.config.backoff_for(attempts);
            warn!(
                module = %spec.path,
                version = %spec.version,
                attempt = attempts,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Retrying fetch"
            );
            last_error = err;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    last_error = StashError::Cancelled;
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let failed = self.metrics.module_failed();
        error!(
            module = %spec.path,
            version = %spec.version,
            attempts,
            error = %last_error,
            "Failed fetching ({}/{})",
            failed,
            self.total
        );
        StashOutcome::failure(&spec, attempts, last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, FetchedModule, Fetcher};
    use crate::storage::{ModuleStore, ObjectModuleStore};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails each module a scripted number of times before succeeding
    #[derive(Default)]
    struct ScriptedFetcher {
        flaky: HashMap<String, u32>,
        missing: HashSet<String>,
        delay: Duration,
        calls: Mutex<HashMap<String, u32>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn calls(&self, module: &str) -> u32 {
            self.calls.lock().unwrap().get(module).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, module: &str, version: &str) -> crate::fetch::Result<FetchedModule> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let entry = calls.entry(module.to_string()).or_insert(0);
                *entry += 1;
                *entry
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.missing.contains(module) {
                return Err(FetchError::NotFound {
                    module: module.to_string(),
                    version: version.to_string(),
                });
            }
            if call <= self.flaky.get(module).copied().unwrap_or(0) {
                return Err(FetchError::Timeout);
            }

            Ok(FetchedModule {
                manifest: Bytes::from(format!("module {module}\n")),
                source: Bytes::from_static(b"zip"),
                info: Bytes::from(format!("{{\"Version\":\"{version}\"}}")),
            })
        }
    }

    fn pool(fetcher: Arc<ScriptedFetcher>, store: Arc<ObjectModuleStore>, config: PoolConfig) -> StashPool {
        StashPool::new(Stasher::new(fetcher, store), config)
    }

    fn fast_config(parallel: usize, retries: u32) -> PoolConfig {
        PoolConfig::builder()
            .max_parallel_tasks(parallel)
            .max_retries_per_task(retries)
            .retry_backoff(Duration::from_millis(1))
            .build()
    }

    fn specs(n: usize) -> Vec<DependencySpec> {
        (0..n)
            .map(|i| DependencySpec::new(format!("example.org/m{i}"), "v1.0.0"))
            .collect()
    }

    #[tokio::test]
    async fn test_one_outcome_per_spec_in_input_order() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let store = Arc::new(ObjectModuleStore::in_memory());
        let input = specs(12);

        let outcomes = pool(fetcher, store.clone(), fast_config(3, 5))
            .run(input.clone(), &CancellationToken::new())
            .await;

        assert_eq!(outcomes.len(), input.len());
        for (outcome, spec) in outcomes.iter().zip(&input) {
            assert_eq!(outcome.path, spec.path);
            assert!(outcome.succeeded);
            assert_eq!(outcome.attempts, 1);
        }
        assert_eq!(store.catalog().await.unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_retries_until_success_within_bound() {
        let fetcher = Arc::new(ScriptedFetcher {
            flaky: HashMap::from([("example.org/m0".to_string(), 2)]),
            ..Default::default()
        });
        let store = Arc::new(ObjectModuleStore::in_memory());

        let outcomes = pool(fetcher.clone(), store, fast_config(2, 5))
            .run(specs(1), &CancellationToken::new())
            .await;

        assert!(outcomes[0].succeeded);
        assert_eq!(outcomes[0].attempts, 3);
        assert_eq!(fetcher.calls("example.org/m0"), 3);
    }

    #[tokio::test]
    async fn test_exhausted_task_does_not_affect_siblings() {
        let fetcher = Arc::new(ScriptedFetcher {
            flaky: HashMap::from([("example.org/m1".to_string(), u32::MAX)]),
            ..Default::default()
        });
        let store = Arc::new(ObjectModuleStore::in_memory());

        let outcomes = pool(fetcher.clone(), store.clone(), fast_config(4, 4))
            .run(specs(5), &CancellationToken::new())
            .await;

        assert_eq!(outcomes.len(), 5);
        assert!(!outcomes[1].succeeded);
        assert_eq!(outcomes[1].attempts, 4);
        assert!(matches!(
            outcomes[1].last_error,
            Some(StashError::Fetch(FetchError::Timeout))
        ));
        assert_eq!(fetcher.calls("example.org/m1"), 4);
        assert_eq!(outcomes.iter().filter(|o| o.succeeded).count(), 4);
        assert!(!store.exists("example.org/m1", "v1.0.0").await.unwrap());
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let fetcher = Arc::new(ScriptedFetcher {
            missing: HashSet::from(["example.org/m0".to_string()]),
            ..Default::default()
        });
        let store = Arc::new(ObjectModuleStore::in_memory());

        let outcomes = pool(fetcher.clone(), store, fast_config(1, 5))
            .run(specs(1), &CancellationToken::new())
            .await;

        assert!(!outcomes[0].succeeded);
        assert_eq!(outcomes[0].attempts, 1);
        assert_eq!(fetcher.calls("example.org/m0"), 1);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let fetcher = Arc::new(ScriptedFetcher {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let store = Arc::new(ObjectModuleStore::in_memory());

        let outcomes = pool(fetcher.clone(), store, fast_config(2, 1))
            .run(specs(8), &CancellationToken::new())
            .await;

        assert!(outcomes.iter().all(|o| o.succeeded));
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retrying() {
        let input = specs(3);
        let fetcher = Arc::new(ScriptedFetcher {
            flaky: input.iter().map(|s| (s.path.clone(), u32::MAX)).collect(),
            ..Default::default()
        });
        let store = Arc::new(ObjectModuleStore::in_memory());
        let config = PoolConfig::builder()
            .max_parallel_tasks(1)
            .max_retries_per_task(1000)
            .retry_backoff(Duration::from_millis(50))
            .build();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            trigger.cancel();
        });

        let outcomes = tokio::time::timeout(
            Duration::from_secs(5),
            pool(fetcher.clone(), store, config).run(input.clone(), &cancel),
        )
        .await
        .expect("pool should stop promptly after cancellation");

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| !o.succeeded && o.is_cancelled()));
        let total_calls: u32 = input.iter().map(|s| fetcher.calls(&s.path)).sum();
        assert!(total_calls < 10, "kept retrying after cancel: {total_calls} calls");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = PoolConfig::builder()
            .retry_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(350))
            .build();
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(350));
    }
}
