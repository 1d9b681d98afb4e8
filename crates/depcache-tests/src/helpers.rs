//! Test helper functions and utilities.

use depcache_api::{AppState, create_router};
use depcache_cache::{
    CacheEntry, CacheMetrics, CacheStore, ClassifierRules, FetchConfig, Fetcher, HttpOrigin,
    MemoryObjectStore, OriginConfig, RequestHandler, StoreConfig, UrlClassifier, WhitelistRule,
};
use depcache_core::ObjectStore;
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Public base URL test proxies redirect cache hits to.
pub const PUBLIC_BASE_URL: &str = "http://cache.test/bucket/";

/// Knobs for [`start_test_proxy`].
pub struct ProxyOptions {
    pub objects: Arc<dyn ObjectStore>,
    pub probe_timeout_ms: u64,
    pub cooldown_secs: u64,
    pub min_size_bytes: u64,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            objects: Arc::new(MemoryObjectStore::new()),
            probe_timeout_ms: 500,
            cooldown_secs: 60,
            min_size_bytes: 1024,
        }
    }
}

/// A running proxy. The server task stops when this is dropped.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    handle: JoinHandle<()>,
}

impl TestProxy {
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.state.store
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.state.metrics
    }

    pub fn lookup(&self, url: &str) -> Option<Arc<CacheEntry>> {
        self.state.store.lookup(url)
    }

    /// Where a hit for `url` is expected to redirect.
    pub fn cache_location(&self, url: &str) -> Option<String> {
        self.lookup(url).map(|e| self.state.store.cache_location(&e))
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Built-in rules plus `127.0.0.1:<port>/files`, the fixture origin.
pub fn test_rules() -> ClassifierRules {
    let mut rules = ClassifierRules::default();
    rules
        .whitelist
        .push(WhitelistRule::file("127.0.0.1:[0-9]+/files"));
    rules
}

/// Start a proxy on an ephemeral port. The cache is rebuilt from
/// `options.objects` first, as at server startup.
pub async fn start_test_proxy(options: ProxyOptions) -> anyhow::Result<TestProxy> {
    let store = Arc::new(CacheStore::new(
        options.objects,
        &StoreConfig {
            cooldown_secs: options.cooldown_secs,
            public_base_url: PUBLIC_BASE_URL.to_string(),
        },
    )?);
    store.rebuild().await?;

    let origin = Arc::new(HttpOrigin::new(&OriginConfig {
        probe_timeout_ms: options.probe_timeout_ms,
        download_timeout_secs: 30,
        ..Default::default()
    })?);
    let metrics = CacheMetrics::new();
    let fetcher = Arc::new(Fetcher::new(
        store.clone(),
        origin.clone(),
        FetchConfig {
            min_size_bytes: options.min_size_bytes,
            scratch_dir: None,
        },
        metrics.clone(),
    ));
    let handler = Arc::new(RequestHandler::new(
        UrlClassifier::new(&test_rules())?,
        store,
        fetcher,
        origin,
        metrics,
    ));
    let state = Arc::new(AppState::new(handler));

    let app = create_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Test server failed");
        }
    });

    Ok(TestProxy {
        addr,
        state,
        handle,
    })
}

/// Create an HTTP client that does not follow redirects.
pub fn test_client() -> Client {
    Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to create test client")
}

/// Client for a running test proxy.
#[derive(Clone)]
pub struct ProxyTestClient {
    client: Client,
    base_url: String,
}

impl ProxyTestClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            client: test_client(),
            base_url: format!("http://{}", addr),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.get(self.url(path)).send().await
    }

    /// Request `target` through the proxy.
    pub async fn proxy(&self, target: &str) -> reqwest::Result<reqwest::Response> {
        self.get(&format!("/{}", target)).await
    }

    /// Check health endpoint.
    pub async fn health(&self) -> anyhow::Result<bool> {
        let resp = self.get("/health").await?;
        Ok(resp.status().is_success())
    }
}

/// The `Location` header of a response, if any.
pub fn location(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Wait for a condition with timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait until `url` has an entry and no download of it is running.
pub async fn wait_for_entry(proxy: &TestProxy, url: &str) -> bool {
    wait_for(Duration::from_secs(10), Duration::from_millis(20), move || async move {
        proxy.lookup(url).is_some() && !proxy.store().is_pending(url)
    })
    .await
}

/// Wait until no download is running.
pub async fn wait_for_idle(proxy: &TestProxy) -> bool {
    wait_for(Duration::from_secs(10), Duration::from_millis(20), move || async move {
        proxy.store().pending_count() == 0
    })
    .await
}

/// Assert that a future completes within a timeout.
pub async fn assert_completes_within<F, T>(future: F, timeout: Duration) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .expect("Operation timed out")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_immediate() {
        let result = wait_for(Duration::from_secs(1), Duration::from_millis(10), || async {
            true
        })
        .await;
        assert!(result);
    }

    #[tokio::test]
    async fn test_wait_for_timeout() {
        let result = wait_for(
            Duration::from_millis(50),
            Duration::from_millis(10),
            || async { false },
        )
        .await;
        assert!(!result);
    }

    #[test]
    fn test_rules_accept_fixture_origin() {
        let classifier = UrlClassifier::new(&test_rules()).unwrap();
        assert_eq!(
            classifier.classify("http://127.0.0.1:41234/files/tool-1.0.tar.gz"),
            depcache_cache::Classification::Cacheable
        );
    }

    #[tokio::test]
    async fn test_proxy_starts_and_is_healthy() {
        let proxy = start_test_proxy(ProxyOptions::default()).await.unwrap();
        let client = ProxyTestClient::new(proxy.addr);
        assert!(client.health().await.unwrap());
    }
}
