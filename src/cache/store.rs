//! TTL and domain-expiry policy over a pluggable backend
//!
//! `CacheStore` is what the proxy talks to. It owns the freshness rule and the
//! disabled mode (TTL of zero); the backends only know how to keep entries.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::key::CacheKey;
use super::memory::MemoryBackend;

/// Errors raised by a cache backend
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing the backing file failed
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be encoded or decoded
    #[error("Cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Computes the instant a payload stops being valid, independent of TTL
pub type DomainExpiryFn = Arc<dyn Fn(&Value) -> Option<DateTime<Utc>> + Send + Sync>;

/// A cached upstream payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key the entry was stored under
    pub key: CacheKey,
    /// Raw upstream payload
    pub payload: Value,
    /// When the payload was stored
    pub stored_at: DateTime<Utc>,
    /// How long the payload stays fresh
    pub ttl: Duration,
    /// Payload-derived invalidation instant (e.g. the next DST transition)
    pub domain_expiry: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Instant at which the TTL runs out, `None` if it cannot be represented
    pub fn ttl_expiry(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
    }

    /// Evaluates freshness against the given wall-clock time
    ///
    /// Both bounds are compared with `now` on every call; nothing about
    /// freshness is remembered between reads.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        let within_ttl = self.ttl_expiry().map_or(true, |expiry| now < expiry);
        let within_domain = self.domain_expiry.map_or(true, |boundary| now < boundary);
        within_ttl && within_domain
    }
}

/// Storage side of the cache
///
/// Implementations must make `store` atomic with respect to `load`: a reader
/// sees either the previous entry or the new one, never a mix.
pub trait CacheBackend: Send + Sync + fmt::Debug {
    /// Prepares the backend (e.g. reads a file from disk)
    fn init(&self) -> Result<(), CacheError> {
        Ok(())
    }

    /// Returns the entry for a key regardless of freshness
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Replaces any entry stored under `entry.key`
    fn store(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Number of entries currently held
    fn len(&self) -> usize;

    /// Persists pending state before the process exits
    fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fresh entries served
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Stale entries served after an upstream failure
    pub stale_served: u64,
    /// Entries written
    pub writes: u64,
    /// Backend failures (treated as misses)
    pub storage_errors: u64,
}

impl CacheStats {
    /// Percentage of lookups answered from a fresh entry
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
    writes: AtomicU64,
    storage_errors: AtomicU64,
}

/// Cache with TTL, domain expiry and a disabled mode
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    domain_expiry: Option<DomainExpiryFn>,
    counters: Arc<Counters>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend)
            .field("ttl", &self.ttl)
            .field("domain_expiry", &self.domain_expiry.is_some())
            .finish()
    }
}

impl CacheStore {
    /// Creates a store over the given backend. A zero `ttl` disables caching.
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            domain_expiry: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Creates a store backed by a process-local map
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), ttl)
    }

    /// Creates a store that never retains anything
    pub fn disabled() -> Self {
        Self::in_memory(Duration::ZERO)
    }

    /// Attaches a payload-derived expiry rule
    pub fn with_domain_expiry(mut self, domain_expiry: DomainExpiryFn) -> Self {
        self.domain_expiry = Some(domain_expiry);
        self
    }

    /// Whether entries are retained at all
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Configured time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Loads persisted state. Failures are logged and leave the cache empty.
    pub fn init(&self) {
        if !self.is_enabled() {
            info!("Caching disabled (TTL 0)");
            return;
        }
        match self.backend.init() {
            Ok(()) => info!(
                entries = self.backend.len(),
                ttl_secs = self.ttl.as_secs(),
                "Cache ready"
            ),
            Err(e) => {
                self.counters.storage_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Cache initialization failed, starting empty");
            }
        }
    }

    /// Flushes the backend and logs final counters
    pub fn shutdown(&self) {
        if let Err(e) = self.backend.flush() {
            warn!(error = %e, "Cache flush failed");
        }
        let stats = self.stats();
        info!(
            hits = stats.hits,
            misses = stats.misses,
            stale_served = stats.stale_served,
            writes = stats.writes,
            storage_errors = stats.storage_errors,
            hit_rate = stats.hit_rate(),
            "Cache shut down"
        );
    }

    /// Returns the entry for `key`, fresh or not, or `None` when absent or disabled
    ///
    /// Callers decide what to do with it via [`CacheStore::is_fresh`].
    pub fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let entry = self.load(key)?;
        match &entry {
            Some(entry) if self.is_fresh(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(entry)
    }

    /// Returns the entry for `key` regardless of freshness, for failure fallback only
    pub fn get_stale(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let entry = self.load(key)?;
        if entry.is_some() {
            self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
        }
        Ok(entry)
    }

    /// Stores `payload` under `key`, replacing any previous entry
    ///
    /// A no-op when caching is disabled or `ttl` is zero.
    pub fn put(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Result<(), CacheError> {
        if !self.is_enabled() || ttl.is_zero() {
            return Ok(());
        }
        let entry = CacheEntry {
            key: key.clone(),
            domain_expiry: self.domain_expiry(&payload),
            payload,
            stored_at: Utc::now(),
            ttl,
        };
        self.backend.store(entry).map_err(|e| {
            self.counters.storage_errors.fetch_add(1, Ordering::Relaxed);
            e
        })?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached payload");
        Ok(())
    }

    /// Freshness of an entry right now
    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.is_fresh_at(Utc::now())
    }

    /// Applies the domain-expiry rule to a payload, if one is configured
    pub fn domain_expiry(&self, payload: &Value) -> Option<DateTime<Utc>> {
        self.domain_expiry.as_ref().and_then(|f| f(payload))
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            storage_errors: self.counters.storage_errors.load(Ordering::Relaxed),
        }
    }

    /// Reads an entry and re-derives its domain expiry from the payload
    ///
    /// Entries reloaded from disk may carry a boundary computed by an older
    /// rule; the configured rule always wins.
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let entry = self.backend.load(key).map_err(|e| {
            self.counters.storage_errors.fetch_add(1, Ordering::Relaxed);
            e
        })?;
        Ok(entry.map(|mut entry| {
            if self.domain_expiry.is_some() {
                entry.domain_expiry = self.domain_expiry(&entry.payload);
            }
            entry
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn key(name: &str) -> CacheKey {
        CacheKey::builder("test").param("name", name).build()
    }

    fn entry_at(stored_at: DateTime<Utc>, ttl: Duration, domain_expiry: Option<DateTime<Utc>>) -> CacheEntry {
        CacheEntry {
            key: key("x"),
            payload: json!({"value": 1}),
            stored_at,
            ttl,
            domain_expiry,
        }
    }

    #[test]
    fn test_entry_fresh_within_ttl() {
        let now = Utc::now();
        let entry = entry_at(now, Duration::from_secs(60), None);

        assert!(entry.is_fresh_at(now + ChronoDuration::seconds(59)));
        assert!(!entry.is_fresh_at(now + ChronoDuration::seconds(60)));
    }

    #[test]
    fn test_past_domain_expiry_is_stale_inside_ttl() {
        let now = Utc::now();
        let entry = entry_at(
            now - ChronoDuration::seconds(5),
            Duration::from_secs(3600),
            Some(now - ChronoDuration::seconds(1)),
        );

        assert!(!entry.is_fresh_at(now));
    }

    #[test]
    fn test_domain_expiry_reevaluated_as_time_moves() {
        let now = Utc::now();
        let boundary = now + ChronoDuration::minutes(10);
        let entry = entry_at(now, Duration::from_secs(86_400), Some(boundary));

        assert!(entry.is_fresh_at(now));
        assert!(!entry.is_fresh_at(boundary));
    }

    #[test]
    fn test_huge_ttl_never_expires_by_time() {
        let now = Utc::now();
        let entry = entry_at(now, Duration::from_secs(u64::MAX), None);

        assert!(entry.is_fresh_at(now + ChronoDuration::days(365)));
    }

    #[test]
    fn test_zero_ttl_store_never_retains() {
        let cache = CacheStore::disabled();
        let k = key("a");

        cache.put(&k, json!({"a": 1}), Duration::from_secs(60)).unwrap();

        assert!(cache.get(&k).unwrap().is_none());
        assert!(cache.get_stale(&k).unwrap().is_none());
        assert!(!cache.is_enabled());
    }

    #[test]
    fn test_put_then_get_returns_fresh_entry() {
        let cache = CacheStore::in_memory(Duration::from_secs(60));
        let k = key("a");

        cache.put(&k, json!({"a": 1}), cache.ttl()).unwrap();
        let entry = cache.get(&k).unwrap().expect("entry stored");

        assert_eq!(entry.payload, json!({"a": 1}));
        assert!(cache.is_fresh(&entry));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_put_overwrites_previous_entry() {
        let cache = CacheStore::in_memory(Duration::from_secs(60));
        let k = key("a");

        cache.put(&k, json!({"v": 1}), cache.ttl()).unwrap();
        cache.put(&k, json!({"v": 2}), cache.ttl()).unwrap();

        assert_eq!(cache.get(&k).unwrap().unwrap().payload, json!({"v": 2}));
    }

    #[test]
    fn test_domain_expiry_fn_applied_on_put() {
        let boundary = Utc::now() - ChronoDuration::seconds(1);
        let cache = CacheStore::in_memory(Duration::from_secs(3600))
            .with_domain_expiry(Arc::new(move |_: &Value| Some(boundary)));
        let k = key("tz");

        cache.put(&k, json!({"timeZone": "Europe/Berlin"}), cache.ttl()).unwrap();
        let entry = cache.get(&k).unwrap().unwrap();

        assert_eq!(entry.domain_expiry, Some(boundary));
        assert!(!cache.is_fresh(&entry));
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_domain_expiry_rederived_on_read() {
        let backend = Arc::new(MemoryBackend::new());
        let k = key("tz");
        // As written by a build whose rule produced no boundary
        backend
            .store(CacheEntry {
                key: k.clone(),
                payload: json!({"timeZone": "Europe/Berlin"}),
                stored_at: Utc::now(),
                ttl: Duration::from_secs(3600),
                domain_expiry: None,
            })
            .unwrap();
        let boundary = Utc::now() - ChronoDuration::seconds(1);
        let cache = CacheStore::new(backend, Duration::from_secs(3600))
            .with_domain_expiry(Arc::new(move |_: &Value| Some(boundary)));

        let entry = cache.get(&k).unwrap().unwrap();

        assert_eq!(entry.domain_expiry, Some(boundary));
        assert!(!cache.is_fresh(&entry));
        assert_eq!(cache.get_stale(&k).unwrap().unwrap().domain_expiry, Some(boundary));
    }

    #[test]
    fn test_get_stale_returns_expired_entry() {
        let cache = CacheStore::in_memory(Duration::from_secs(3600))
            .with_domain_expiry(Arc::new(|_: &Value| Some(Utc::now() - ChronoDuration::hours(1))));
        let k = key("old");

        cache.put(&k, json!({"old": true}), cache.ttl()).unwrap();

        let stale = cache.get_stale(&k).unwrap().expect("stale entry kept");
        assert_eq!(stale.payload, json!({"old": true}));
        assert_eq!(cache.stats().stale_served, 1);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 1,
            misses: 3,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 25.0).abs() < 0.01);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
