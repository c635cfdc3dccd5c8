//! Response cache for upstream payloads
//!
//! Entries are keyed by a normalized request fingerprint and held either in
//! memory or in a single JSON file on disk. Freshness combines a TTL with an
//! optional payload-derived expiry, and expired entries stay readable through
//! `get_stale` so the proxy can degrade gracefully when an upstream is down.

mod file;
mod key;
mod memory;
mod store;

pub use file::FileBackend;
pub use key::{CacheKey, CacheKeyBuilder};
pub use memory::MemoryBackend;
pub use store::{
    CacheBackend, CacheEntry, CacheError, CacheStats, CacheStore, DomainExpiryFn,
};
