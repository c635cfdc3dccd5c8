//! Cache-first fetch with coalescing and stale fallback

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::fetched::Fetched;
use crate::cache::{CacheKey, CacheStore};
use crate::upstream::{RequestSpec, UpstreamClient, UpstreamError};

/// Payload obtained by one upstream call, shared by every waiter
#[derive(Debug, Clone)]
struct FreshPayload {
    payload: Value,
    fetched_at: DateTime<Utc>,
}

type InFlight = Shared<BoxFuture<'static, Result<FreshPayload, UpstreamError>>>;

type Registry = Arc<Mutex<HashMap<CacheKey, InFlight>>>;

/// Unregisters an in-flight call when its task ends, panics included
struct Unregister {
    registry: Registry,
    key: CacheKey,
}

impl Drop for Unregister {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

/// Orchestrates cache, upstream and fallback for one proxy
///
/// Lookup order for a request:
/// 1. Unless forced, a fresh cache entry is returned without contacting the upstream.
/// 2. Otherwise the upstream is called (one call per key at a time) and a
///    success is written to the cache.
/// 3. On a transient failure of a non-forced request, an expired entry is
///    served with a warning. Forced requests and permanent failures surface
///    the upstream error.
#[derive(Clone)]
pub struct ResilientProxy {
    name: String,
    cache: CacheStore,
    upstream: UpstreamClient,
    in_flight: Registry,
}

impl fmt::Debug for ResilientProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientProxy")
            .field("name", &self.name)
            .field("cache", &self.cache)
            .field("upstream", &self.upstream)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl ResilientProxy {
    /// Creates an orchestrator over a cache and an upstream client
    pub fn new(name: impl Into<String>, cache: CacheStore, upstream: UpstreamClient) -> Self {
        Self {
            name: name.into(),
            cache,
            upstream,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Proxy name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cache this proxy reads and writes
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Loads durable cache state
    pub fn init(&self) {
        self.cache.init();
    }

    /// Flushes the cache and logs its counters
    pub fn shutdown(&self) {
        info!(proxy = %self.name, "Shutting down proxy");
        self.cache.shutdown();
    }

    /// Number of upstream calls currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Returns the payload for `key`, from the cache or the upstream
    ///
    /// # Arguments
    /// * `key` - Cache key computed from the semantic request parameters
    /// * `spec` - Upstream request to issue on a miss
    /// * `force` - Skip the cache read and never fall back to stale data
    ///
    /// # Returns
    /// * `Ok(Fetched)` - Fresh, cached or stale payload with its metadata
    /// * `Err(UpstreamError)` - Upstream failure with no usable fallback
    pub async fn fetch_through(
        &self,
        key: &CacheKey,
        spec: &RequestSpec,
        force: bool,
    ) -> Result<Fetched, UpstreamError> {
        if force {
            debug!(proxy = %self.name, key = %key, "Force refresh, bypassing cache read");
        } else {
            match self.cache.get(key) {
                Ok(Some(entry)) if self.cache.is_fresh(&entry) => {
                    debug!(proxy = %self.name, key = %key, "Cache hit");
                    return Ok(Fetched::from_cache(entry));
                }
                Ok(Some(_)) => debug!(proxy = %self.name, key = %key, "Cache entry expired"),
                Ok(None) => debug!(proxy = %self.name, key = %key, "Cache miss"),
                Err(e) => {
                    warn!(
                        proxy = %self.name,
                        key = %key,
                        error = %e,
                        "Cache read failed, treating as miss"
                    );
                }
            }
        }

        match self.shared_call(key, spec).await {
            Ok(fresh) => {
                let next_update_at = self.cache.domain_expiry(&fresh.payload);
                Ok(Fetched::from_upstream(
                    fresh.payload,
                    fresh.fetched_at,
                    next_update_at,
                ))
            }
            Err(error) => self.fallback(key, force, error),
        }
    }

    fn fallback(
        &self,
        key: &CacheKey,
        force: bool,
        error: UpstreamError,
    ) -> Result<Fetched, UpstreamError> {
        if force || !error.is_transient() {
            return Err(error);
        }
        match self.cache.get_stale(key) {
            Ok(Some(entry)) => {
                warn!(
                    proxy = %self.name,
                    key = %key,
                    error = %error,
                    stored_at = %entry.stored_at,
                    "Serving stale cache entry"
                );
                Ok(Fetched::stale(entry, &error.to_string()))
            }
            Ok(None) => Err(error),
            Err(e) => {
                warn!(proxy = %self.name, key = %key, error = %e, "Stale cache read failed");
                Err(error)
            }
        }
    }

    /// Joins the running call for `key` or starts one
    ///
    /// The call runs on its own task so it completes, and populates the
    /// cache, even if every waiter goes away.
    fn shared_call(&self, key: &CacheKey, spec: &RequestSpec) -> InFlight {
        let mut in_flight = self.in_flight.lock();
        if let Some(running) = in_flight.get(key) {
            debug!(proxy = %self.name, key = %key, "Joining in-flight upstream call");
            return running.clone();
        }

        let task = {
            let key = key.clone();
            let spec = spec.clone();
            let cache = self.cache.clone();
            let upstream = self.upstream.clone();
            let guard = Unregister {
                registry: Arc::clone(&self.in_flight),
                key: key.clone(),
            };
            let name = self.name.clone();
            tokio::spawn(async move {
                let _guard = guard;
                let result = upstream.fetch(&spec).await.map(|payload| FreshPayload {
                    payload,
                    fetched_at: Utc::now(),
                });
                if let Ok(fresh) = &result {
                    if let Err(e) = cache.put(&key, fresh.payload.clone(), cache.ttl()) {
                        warn!(proxy = %name, key = %key, error = %e, "Cache write failed");
                    }
                }
                result
            })
        };

        let call: InFlight = async move {
            task.await.unwrap_or_else(|e| {
                Err(UpstreamError::Network(format!("upstream task failed: {}", e)))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(key.clone(), call.clone());
        call
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, CacheEntry, CacheError};
    use crate::proxy::Source;
    use crate::upstream::{RetryPolicy, Transport};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays scripted outcomes, counting calls
    #[derive(Debug, Default)]
    struct StubUpstream {
        outcomes: Mutex<VecDeque<Result<Value, UpstreamError>>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl StubUpstream {
        fn push(&self, outcome: Result<Value, UpstreamError>) {
            self.outcomes.lock().push_back(outcome);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for StubUpstream {
        async fn send(&self, _spec: &RequestSpec) -> Result<Value, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(UpstreamError::Network("no scripted outcome".into())))
        }
    }

    /// Panics on the first call, succeeds afterwards
    #[derive(Debug, Default)]
    struct PanicOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for PanicOnce {
        async fn send(&self, _spec: &RequestSpec) -> Result<Value, UpstreamError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("transport bug");
            }
            Ok(json!({"recovered": true}))
        }
    }

    /// Backend whose every read and write fails
    #[derive(Debug)]
    struct BrokenBackend;

    impl CacheBackend for BrokenBackend {
        fn load(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
            Err(std::io::Error::other("disk unavailable").into())
        }

        fn store(&self, _entry: CacheEntry) -> Result<(), CacheError> {
            Err(std::io::Error::other("disk full").into())
        }

        fn len(&self) -> usize {
            0
        }
    }

    fn broken_cache() -> CacheStore {
        CacheStore::new(Arc::new(BrokenBackend), Duration::from_secs(60))
    }

    fn proxy_with(stub: Arc<StubUpstream>, cache: CacheStore) -> ResilientProxy {
        let upstream = UpstreamClient::new(stub, RetryPolicy::no_retry(), Duration::from_secs(5));
        ResilientProxy::new("test", cache, upstream)
    }

    fn key() -> CacheKey {
        CacheKey::builder("test").param("q", "k").build()
    }

    fn spec() -> RequestSpec {
        RequestSpec::get("https://upstream.test/").query("q", "k")
    }

    fn expired_cache() -> CacheStore {
        // Every entry's domain expiry is already behind us
        CacheStore::in_memory(Duration::from_secs(3600))
            .with_domain_expiry(Arc::new(|_: &Value| Some(Utc::now() - chrono::Duration::seconds(1))))
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_upstream() {
        let stub = Arc::new(StubUpstream::default());
        let cache = CacheStore::in_memory(Duration::from_secs(60));
        cache.put(&key(), json!({"v": 1}), cache.ttl()).unwrap();
        let proxy = proxy_with(stub.clone(), cache);

        let fetched = proxy.fetch_through(&key(), &spec(), false).await.unwrap();

        assert_eq!(fetched.source, Source::Cache);
        assert!(fetched.is_cached());
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_miss_hit_force() {
        let stub = Arc::new(StubUpstream::default());
        stub.push(Ok(json!({"v": "P"})));
        stub.push(Ok(json!({"v": "P2"})));
        let proxy = proxy_with(stub.clone(), CacheStore::in_memory(Duration::from_secs(60)));

        let a = proxy.fetch_through(&key(), &spec(), false).await.unwrap();
        assert_eq!(a.payload, json!({"v": "P"}));
        assert!(!a.is_cached());

        let b = proxy.fetch_through(&key(), &spec(), false).await.unwrap();
        assert_eq!(b.payload, json!({"v": "P"}));
        assert!(b.is_cached());
        assert_eq!(stub.calls(), 1);

        let c = proxy.fetch_through(&key(), &spec(), true).await.unwrap();
        assert_eq!(c.payload, json!({"v": "P2"}));
        assert!(!c.is_cached());
        assert_eq!(stub.calls(), 2);

        let stored = proxy.cache().get(&key()).unwrap().unwrap();
        assert_eq!(stored.payload, json!({"v": "P2"}));
    }

    #[tokio::test]
    async fn test_transient_failure_serves_stale() {
        let stub = Arc::new(StubUpstream::default());
        let cache = expired_cache();
        cache.put(&key(), json!({"old": true}), cache.ttl()).unwrap();
        stub.push(Err(UpstreamError::http(502, "bad gateway", None)));
        let proxy = proxy_with(stub.clone(), cache);

        let fetched = proxy.fetch_through(&key(), &spec(), false).await.unwrap();

        assert_eq!(fetched.payload, json!({"old": true}));
        assert!(fetched.is_stale());
        assert!(fetched.is_cached());
        assert!(fetched.warning.is_some());
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_forced_failure_is_not_masked() {
        let stub = Arc::new(StubUpstream::default());
        let cache = CacheStore::in_memory(Duration::from_secs(60));
        cache.put(&key(), json!({"old": true}), cache.ttl()).unwrap();
        stub.push(Err(UpstreamError::Network("down".into())));
        let proxy = proxy_with(stub.clone(), cache);

        let err = proxy.fetch_through(&key(), &spec(), true).await.unwrap_err();

        assert_eq!(err, UpstreamError::Network("down".into()));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_masked() {
        let stub = Arc::new(StubUpstream::default());
        let cache = expired_cache();
        cache.put(&key(), json!({"old": true}), cache.ttl()).unwrap();
        stub.push(Err(UpstreamError::http(404, "unknown zone", None)));
        let proxy = proxy_with(stub.clone(), cache);

        let err = proxy.fetch_through(&key(), &spec(), false).await.unwrap_err();

        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_failure_without_stale_entry_surfaces() {
        let stub = Arc::new(StubUpstream::default());
        stub.push(Err(UpstreamError::EmptyResponse));
        let proxy = proxy_with(stub.clone(), CacheStore::in_memory(Duration::from_secs(60)));

        let err = proxy.fetch_through(&key(), &spec(), false).await.unwrap_err();

        assert_eq!(err, UpstreamError::EmptyResponse);
    }

    #[tokio::test]
    async fn test_storage_failures_do_not_fail_request() {
        let stub = Arc::new(StubUpstream::default());
        stub.push(Ok(json!({"v": 1})));
        let proxy = proxy_with(stub.clone(), broken_cache());

        let fetched = proxy.fetch_through(&key(), &spec(), false).await.unwrap();

        assert_eq!(fetched.source, Source::Upstream);
        assert_eq!(fetched.payload, json!({"v": 1}));
        assert_eq!(stub.calls(), 1);
        // One failed read, one failed write
        assert_eq!(proxy.cache().stats().storage_errors, 2);
        assert_eq!(proxy.cache().stats().writes, 0);
    }

    #[tokio::test]
    async fn test_unreadable_stale_entry_surfaces_upstream_error() {
        let stub = Arc::new(StubUpstream::default());
        stub.push(Err(UpstreamError::Network("down".into())));
        let proxy = proxy_with(stub.clone(), broken_cache());

        let err = proxy.fetch_through(&key(), &spec(), false).await.unwrap_err();

        assert_eq!(err, UpstreamError::Network("down".into()));
        // Failed read before the call, failed stale read after it
        assert_eq!(proxy.cache().stats().storage_errors, 2);
        assert_eq!(proxy.cache().stats().stale_served, 0);
    }

    #[tokio::test]
    async fn test_panicking_call_is_unregistered() {
        let stub = Arc::new(PanicOnce::default());
        let upstream =
            UpstreamClient::new(stub.clone(), RetryPolicy::no_retry(), Duration::from_secs(5));
        let proxy = ResilientProxy::new("test", CacheStore::in_memory(Duration::from_secs(60)), upstream);

        let err = proxy.fetch_through(&key(), &spec(), false).await.unwrap_err();
        assert!(err.to_string().contains("upstream task failed"));
        assert_eq!(proxy.in_flight(), 0);

        let fetched = proxy.fetch_through(&key(), &spec(), false).await.unwrap();
        assert_eq!(fetched.payload, json!({"recovered": true}));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_calls_upstream() {
        let stub = Arc::new(StubUpstream::default());
        stub.push(Ok(json!({"n": 1})));
        stub.push(Ok(json!({"n": 2})));
        let proxy = proxy_with(stub.clone(), CacheStore::disabled());

        let first = proxy.fetch_through(&key(), &spec(), false).await.unwrap();
        let second = proxy.fetch_through(&key(), &spec(), false).await.unwrap();

        assert!(!first.is_cached());
        assert!(!second.is_cached());
        assert_eq!(second.payload, json!({"n": 2}));
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_next_update_from_payload() {
        let boundary = Utc::now() + chrono::Duration::days(30);
        let stub = Arc::new(StubUpstream::default());
        stub.push(Ok(json!({"zone": "x"})));
        let cache = CacheStore::in_memory(Duration::from_secs(60))
            .with_domain_expiry(Arc::new(move |_: &Value| Some(boundary)));
        let proxy = proxy_with(stub, cache);

        let fetched = proxy.fetch_through(&key(), &spec(), false).await.unwrap();

        assert_eq!(fetched.next_update_at, Some(boundary));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_call() {
        let stub = Arc::new(StubUpstream {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        stub.push(Ok(json!({"shared": true})));
        let proxy = proxy_with(stub.clone(), CacheStore::in_memory(Duration::from_secs(60)));

        let calls = (0..8).map(|_| {
            let proxy = proxy.clone();
            tokio::spawn(async move { proxy.fetch_through(&key(), &spec(), false).await })
        });
        let results = futures::future::join_all(calls).await;

        for result in results {
            let fetched = result.expect("task completes").expect("fetch succeeds");
            assert_eq!(fetched.payload, json!({"shared": true}));
        }
        assert_eq!(stub.calls(), 1);
        assert_eq!(proxy.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_call_completes_after_caller_goes_away() {
        let stub = Arc::new(StubUpstream {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        stub.push(Ok(json!({"late": true})));
        let proxy = proxy_with(stub.clone(), CacheStore::in_memory(Duration::from_secs(60)));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            proxy.fetch_through(&key(), &spec(), false),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;

        let cached = proxy.cache().get(&key()).unwrap().expect("written by background call");
        assert_eq!(cached.payload, json!({"late": true}));
        assert_eq!(proxy.in_flight(), 0);
    }
}
