//! Durable single-file cache backend
//!
//! Keeps every entry of one proxy in a single JSON document on disk, mirrored
//! in memory for reads. Each write replaces the file through a temporary
//! sibling and a rename, so a crash mid-write leaves the previous file intact.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use directories::ProjectDirs;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::key::CacheKey;
use super::store::{CacheBackend, CacheEntry, CacheError};

/// On-disk layout of the cache file
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: Vec<CacheEntry>,
}

/// Cache backend persisted to one JSON file
///
/// The default location is the XDG cache directory (`~/.cache/orbs-proxy/` on
/// Linux). Entries are loaded by [`CacheBackend::init`] and written through on
/// every store.
#[derive(Debug)]
pub struct FileBackend {
    /// File holding all entries
    path: PathBuf,
    /// In-memory mirror used for reads
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    /// Serializes file writes so snapshots land on disk in order
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Creates a backend that persists to `path`
    ///
    /// Nothing is read until [`CacheBackend::init`] runs.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Default cache file for a proxy, under the XDG cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn default_path(proxy_name: &str) -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "orbs-proxy")?;
        Some(
            project_dirs
                .cache_dir()
                .join(format!("{}_cache.json", proxy_name)),
        )
    }

    /// Ensures the parent directory exists
    fn ensure_dir(&self) -> io::Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }

    /// Writes a full snapshot of the entries to disk
    fn persist(&self, entries: &HashMap<CacheKey, CacheEntry>) -> Result<(), CacheError> {
        self.ensure_dir()?;

        let mut snapshot: Vec<CacheEntry> = entries.values().cloned().collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        let json = serde_json::to_string_pretty(&CacheFile { entries: snapshot })?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl CacheBackend for FileBackend {
    fn init(&self) -> Result<(), CacheError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No cache file yet");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let file: CacheFile = serde_json::from_str(&content)?;

        let mut entries = self.entries.write();
        entries.clear();
        for entry in file.entries {
            entries.insert(entry.key.clone(), entry);
        }
        Ok(())
    }

    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn store(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock();
        let snapshot = {
            let mut entries = self.entries.write();
            entries.insert(entry.key.clone(), entry);
            entries.clone()
        };
        self.persist(&snapshot)
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn flush(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock();
        let snapshot = self.entries.read().clone();
        if snapshot.is_empty() && !self.path.exists() {
            return Ok(());
        }
        self.persist(&snapshot)
    }
}
