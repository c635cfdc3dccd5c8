//! Application wiring for one proxy process
//!
//! `App` owns the adapter, the resilient proxy (cache + upstream) and the
//! per-client rate limiter. It is cheap to clone and is the axum state shared
//! by every handler.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::adapters::{self, Adapter, RequestInput};
use crate::cache::{CacheBackend, CacheStore, FileBackend, MemoryBackend};
use crate::config::{CacheBackendKind, PreloadConfig, ProxyConfig};
use crate::error::ProxyError;
use crate::limiter::RateLimiter;
use crate::proxy::ResilientProxy;
use crate::refresh::WarmupHandle;
use crate::upstream::UpstreamClient;

/// Errors raised while assembling the application
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Shared state of a running proxy
#[derive(Clone)]
pub struct App {
    adapter: Arc<dyn Adapter>,
    proxy: ResilientProxy,
    limiter: Arc<RateLimiter>,
    preload: PreloadConfig,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("adapter", &self.adapter.name())
            .field("proxy", &self.proxy)
            .field("rate_limit", &self.limiter.config().describe())
            .finish()
    }
}

impl App {
    /// Builds the application from configuration
    ///
    /// # Arguments
    /// * `config` - Effective proxy configuration
    /// * `adapter` - Adapter for `config.kind`
    ///
    /// # Returns
    /// * `Ok(App)` ready to `init` and serve
    /// * `Err(AppError)` if the HTTP client cannot be built
    pub fn new(config: &ProxyConfig, adapter: Arc<dyn Adapter>) -> Result<Self, AppError> {
        let backend: Arc<dyn CacheBackend> = match &config.cache_backend {
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new()),
            CacheBackendKind::File(path) => Arc::new(FileBackend::new(path.clone())),
        };
        let mut cache = CacheStore::new(backend, config.cache_ttl);
        if let Some(expiry) = adapter.domain_expiry() {
            cache = cache.with_domain_expiry(expiry);
        }

        let upstream = UpstreamClient::http(config.retry.clone(), config.timeout)?;
        let proxy = ResilientProxy::new(adapter.name(), cache, upstream);
        let limiter = RateLimiter::new(adapter.name(), config.rate_limit.clone());

        Ok(Self::with_components(adapter, proxy, limiter).with_preload(config.preload.clone()))
    }

    /// Builds the adapter for `config.kind` and the application around it
    pub fn from_config(config: &ProxyConfig) -> Result<Self, AppError> {
        let adapter = adapters::build(config.kind, &config.adapter);
        Self::new(config, adapter)
    }

    /// Creates an App from already-built parts (useful for testing)
    pub fn with_components(
        adapter: Arc<dyn Adapter>,
        proxy: ResilientProxy,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            adapter,
            proxy,
            limiter: Arc::new(limiter),
            preload: PreloadConfig::default(),
        }
    }

    /// Sets the items warmed by [`App::warm_up`]
    pub fn with_preload(mut self, preload: PreloadConfig) -> Self {
        self.preload = preload;
        self
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn proxy(&self) -> &ResilientProxy {
        &self.proxy
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Loads durable cache state
    pub fn init(&self) {
        self.proxy.init();
    }

    /// Starts the cache warm-up, if there is anything to preload
    pub fn warm_up(&self) -> Option<WarmupHandle> {
        if self.preload.items.is_empty() {
            return None;
        }
        if !self.proxy.cache().is_enabled() {
            info!(proxy = %self.adapter.name(), "Caching disabled, skipping preload");
            return None;
        }
        Some(WarmupHandle::spawn(
            self.proxy.clone(),
            Arc::clone(&self.adapter),
            self.preload.clone(),
        ))
    }

    /// Serves one admitted request
    ///
    /// Parses the inbound fields, fetches through the cache, shapes the payload
    /// and wraps it in the response envelope.
    pub async fn handle(&self, input: RequestInput) -> Result<Value, ProxyError> {
        let request = self.adapter.parse(&input)?;
        debug!(
            proxy = %self.adapter.name(),
            key = %request.key,
            force = request.force,
            "Proxy request"
        );

        let fetched = self
            .proxy
            .fetch_through(&request.key, &request.spec, request.force)
            .await?;

        let body = self.adapter.shape(fetched.payload.clone(), &request);
        Ok(fetched.envelope(body))
    }

    /// Flushes the cache and logs final counters
    pub fn shutdown(&self) {
        self.proxy.shutdown();
    }
}
