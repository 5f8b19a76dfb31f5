//! Module proxy client against a local mock GOPROXY
//!
//! The mock serves a fixed path -> (status, body) table and counts hits per
//! path. Paths listed in `flaky` answer 503 on their first request.

use axum::{
    Router,
    extract::State,
    http::{StatusCode, Uri},
    response::IntoResponse,
};
use modstash::fetch::{FetchError, Fetcher, HttpConfig, ProxyFetcher};
use modstash::manifest::DependencySpec;
use modstash::stash::{PoolConfig, StashPool, Stasher};
use modstash::storage::{ModuleStore, ObjectModuleStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MockProxy {
    routes: HashMap<String, (StatusCode, Vec<u8>)>,
    flaky: HashSet<String>,
    hits: Mutex<HashMap<String, usize>>,
}

impl MockProxy {
    fn module(mut self, escaped: &str, version: &str) -> Self {
        let base = format!("/{escaped}/@v/{version}");
        self.routes.insert(
            format!("{base}.info"),
            (
                StatusCode::OK,
                format!(r#"{{"Version":"{version}","Time":"2024-03-01T10:00:00Z"}}"#).into_bytes(),
            ),
        );
        self.routes.insert(
            format!("{base}.mod"),
            (StatusCode::OK, format!("module {escaped}\n").into_bytes()),
        );
        self.routes.insert(
            format!("{base}.zip"),
            (StatusCode::OK, b"PK\x03\x04 zip body".to_vec()),
        );
        self
    }

    fn route(mut self, path: &str, status: StatusCode, body: &str) -> Self {
        self.routes
            .insert(path.to_string(), (status, body.as_bytes().to_vec()));
        self
    }

    fn flaky(mut self, path: &str) -> Self {
        self.flaky.insert(path.to_string());
        self
    }

    fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

async fn serve(State(proxy): State<Arc<MockProxy>>, uri: Uri) -> impl IntoResponse {
    let path = uri.path().to_string();
    let seen = {
        let mut hits = proxy.hits.lock().unwrap();
        let count = hits.entry(path.clone()).or_insert(0);
        *count += 1;
        *count
    };

    if seen == 1 && proxy.flaky.contains(&path) {
        return (StatusCode::SERVICE_UNAVAILABLE, Vec::new());
    }
    match proxy.routes.get(&path) {
        Some((status, body)) => (*status, body.clone()),
        None => (StatusCode::NOT_FOUND, b"not found".to_vec()),
    }
}

/// Start the mock on an ephemeral port and return its base URL
async fn start(proxy: Arc<MockProxy>) -> String {
    let app = Router::new().fallback(serve).with_state(proxy);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn fetcher(base_url: &str) -> ProxyFetcher {
    let config = HttpConfig {
        request_timeout: Duration::from_secs(5),
        ..HttpConfig::default()
    };
    ProxyFetcher::new(base_url, config).unwrap()
}

#[tokio::test]
async fn test_fetches_all_three_artifacts() {
    let proxy = Arc::new(MockProxy::default().module("example.org/x", "v1.0.0"));
    let base = start(Arc::clone(&proxy)).await;

    let fetched = fetcher(&base).fetch("example.org/x", "v1.0.0").await.unwrap();

    assert_eq!(&fetched.manifest[..], b"module example.org/x\n");
    assert_eq!(&fetched.source[..], b"PK\x03\x04 zip body");
    assert!(fetched.info.starts_with(br#"{"Version":"v1.0.0""#));
    assert_eq!(proxy.hits("/example.org/x/@v/v1.0.0.zip"), 1);
}

#[tokio::test]
async fn test_uppercase_paths_are_case_encoded() {
    let proxy = Arc::new(MockProxy::default().module("github.com/!azure/go-sdk", "v1.2.0"));
    let base = start(Arc::clone(&proxy)).await;

    let fetched = fetcher(&base)
        .fetch("github.com/Azure/go-sdk", "v1.2.0")
        .await
        .unwrap();

    assert!(!fetched.source.is_empty());
    assert_eq!(proxy.hits("/github.com/!azure/go-sdk/@v/v1.2.0.info"), 1);
}

#[tokio::test]
async fn test_unknown_version_is_not_found() {
    let proxy = Arc::new(MockProxy::default());
    let base = start(proxy).await;

    let err = fetcher(&base).fetch("example.org/x", "v9.9.9").await.unwrap_err();

    assert!(matches!(err, FetchError::NotFound { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let proxy = Arc::new(MockProxy::default().route(
        "/example.org/x/@v/v1.0.0.info",
        StatusCode::BAD_GATEWAY,
        "upstream down",
    ));
    let base = start(proxy).await;

    let err = fetcher(&base).fetch("example.org/x", "v1.0.0").await.unwrap_err();

    assert!(matches!(err, FetchError::Server { status: 502, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_forbidden_is_permanent() {
    let proxy = Arc::new(MockProxy::default().route(
        "/example.org/private/@v/v1.0.0.info",
        StatusCode::FORBIDDEN,
        "no",
    ));
    let base = start(proxy).await;

    let err = fetcher(&base)
        .fetch("example.org/private", "v1.0.0")
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Rejected { status: 403, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_info_version_mismatch_is_rejected() {
    let proxy = Arc::new(MockProxy::default().route(
        "/example.org/x/@v/v1.0.0.info",
        StatusCode::OK,
        r#"{"Version":"v1.0.1"}"#,
    ));
    let base = start(Arc::clone(&proxy)).await;

    let err = fetcher(&base).fetch("example.org/x", "v1.0.0").await.unwrap_err();

    assert!(matches!(err, FetchError::InvalidInfo(_)));
    assert_eq!(proxy.hits("/example.org/x/@v/v1.0.0.mod"), 0);
}

#[test]
fn test_rejects_non_http_base_url() {
    let result = ProxyFetcher::new("ftp://proxy.example.org", HttpConfig::default());
    assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
}

#[tokio::test]
async fn test_pool_retries_through_a_transient_outage() {
    let proxy = Arc::new(
        MockProxy::default()
            .module("example.org/x", "v1.0.0")
            .module("example.org/a/b", "v2.3.1")
            .flaky("/example.org/a/b/@v/v2.3.1.zip"),
    );
    let base = start(Arc::clone(&proxy)).await;

    let store = Arc::new(ObjectModuleStore::in_memory());
    let pool = StashPool::new(
        Stasher::new(Arc::new(fetcher(&base)), Arc::clone(&store) as Arc<dyn ModuleStore>),
        PoolConfig::builder()
            .max_parallel_tasks(2)
            .max_retries_per_task(3)
            .retry_backoff(Duration::from_millis(10))
            .build(),
    );

    let specs = vec![
        DependencySpec::new("example.org/x", "v1.0.0"),
        DependencySpec::new("example.org/a/b", "v2.3.1"),
        DependencySpec::new("example.org/gone", "v0.1.0"),
    ];
    let outcomes = pool.run(specs, &CancellationToken::new()).await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].succeeded);
    assert_eq!(outcomes[0].attempts, 1);
    assert!(outcomes[1].succeeded);
    assert_eq!(outcomes[1].attempts, 2);
    assert!(!outcomes[2].succeeded);
    assert_eq!(outcomes[2].attempts, 1);

    assert_eq!(
        store.catalog().await.unwrap(),
        vec![
            ("example.org/a/b".to_string(), "v2.3.1".to_string()),
            ("example.org/x".to_string(), "v1.0.0".to_string()),
        ]
    );
}
