//! The resilient caching layer shared by every proxy
//!
//! [`ResilientProxy`] composes a [`CacheStore`](crate::cache::CacheStore)
//! with an [`UpstreamClient`](crate::upstream::UpstreamClient). Adapters give
//! it a cache key and a request; it decides between cache, upstream and stale
//! fallback and reports which one answered through [`Fetched`].

mod fetched;
mod resilient;

pub use fetched::{Fetched, Source, PROXY_INFO_KEY};
pub use resilient::ResilientProxy;
