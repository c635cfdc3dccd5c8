//! Cache key construction
//!
//! A `CacheKey` is built from the parameters that change what the upstream
//! returns, credentials included. Control flags such as force-refresh never
//! go through the builder, so two requests that differ only in those flags
//! always share a key.
//!
//! Keys are logged and persisted, so credentials enter them as a SHA-256
//! digest rather than in clear text.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Deterministic fingerprint of an upstream request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Starts a key for the given namespace (usually the adapter name)
    pub fn builder(namespace: &str) -> CacheKeyBuilder {
        CacheKeyBuilder {
            namespace: namespace.to_string(),
            params: BTreeMap::new(),
        }
    }

    /// Returns the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collects semantic parameters in sorted order
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    params: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    /// Adds a parameter. A later value for the same name replaces the earlier one.
    pub fn param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Adds a credential (API key, token) by its digest
    ///
    /// Requests with different credentials can get different upstream
    /// answers (data for one, 401 for another), so they must not share an
    /// entry or an in-flight call.
    pub fn credential(self, name: &str, secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        self.param(name, format!("sha256:{}", hex::encode(digest)))
    }

    /// Finalizes the key
    ///
    /// The parameter map is rendered as JSON; `BTreeMap` iteration is sorted,
    /// so insertion order has no effect on the result.
    pub fn build(self) -> CacheKey {
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        CacheKey(format!("{}:{}", self.namespace, params))
    }
}
