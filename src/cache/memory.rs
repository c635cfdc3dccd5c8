//! Process-local cache backend

use std::collections::HashMap;

use parking_lot::RwLock;

use super::key::CacheKey;
use super::store::{CacheBackend, CacheEntry, CacheError};

/// Keeps entries in a map guarded by a single lock. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryBackend {
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn store(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.write().insert(entry.key.clone(), entry);
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
