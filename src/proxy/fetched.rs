//! Result of a fetch and the response envelope built from it

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::cache::CacheEntry;

/// Key of the metadata object added to every successful response
pub const PROXY_INFO_KEY: &str = "proxy-info";

/// Where a payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Fetched from the upstream for this request
    Upstream,
    /// Fresh cache entry
    Cache,
    /// Expired cache entry served because the upstream failed
    Stale,
}

/// A payload plus the metadata needed to describe it to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    /// Raw upstream payload
    pub payload: Value,
    pub source: Source,
    /// When the payload was obtained from the upstream
    pub fetched_at: DateTime<Utc>,
    /// Payload-derived invalidation instant
    pub next_update_at: Option<DateTime<Utc>>,
    /// Set when degraded data is served
    pub warning: Option<String>,
}

impl Fetched {
    pub(crate) fn from_upstream(
        payload: Value,
        fetched_at: DateTime<Utc>,
        next_update_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            payload,
            source: Source::Upstream,
            fetched_at,
            next_update_at,
            warning: None,
        }
    }

    pub(crate) fn from_cache(entry: CacheEntry) -> Self {
        Self {
            payload: entry.payload,
            source: Source::Cache,
            fetched_at: entry.stored_at,
            next_update_at: entry.domain_expiry,
            warning: None,
        }
    }

    pub(crate) fn stale(entry: CacheEntry, reason: &str) -> Self {
        let warning = format!(
            "Upstream unavailable ({}); serving cached data from {}",
            reason,
            rfc3339(entry.stored_at)
        );
        Self {
            payload: entry.payload,
            source: Source::Stale,
            fetched_at: entry.stored_at,
            next_update_at: entry.domain_expiry,
            warning: Some(warning),
        }
    }

    /// Whether the payload was served from the cache (fresh or stale)
    pub fn is_cached(&self) -> bool {
        self.source != Source::Upstream
    }

    /// Whether an expired entry was served
    pub fn is_stale(&self) -> bool {
        self.source == Source::Stale
    }

    /// Metadata object describing this result at `now`
    pub fn proxy_info(&self, now: DateTime<Utc>) -> Value {
        let mut info = json!({
            "cachedResponse": self.is_cached(),
            "statusCode": 200,
            "timestamp": rfc3339(now),
            "fetchedAt": rfc3339(self.fetched_at),
            "nextUpdateAt": self.next_update_at.map(rfc3339),
            "stale": self.is_stale(),
        });
        if let (Some(warning), Value::Object(map)) = (&self.warning, &mut info) {
            map.insert("warning".to_string(), Value::String(warning.clone()));
        }
        info
    }

    /// Wraps a (shaped) body with the `proxy-info` metadata
    ///
    /// Non-object bodies are nested under `data` so the metadata always has
    /// an object to live in.
    pub fn envelope(&self, body: Value) -> Value {
        self.envelope_at(body, Utc::now())
    }

    pub(crate) fn envelope_at(&self, body: Value, now: DateTime<Utc>) -> Value {
        let mut map = match body {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        map.insert(PROXY_INFO_KEY.to_string(), self.proxy_info(now));
        Value::Object(map)
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
