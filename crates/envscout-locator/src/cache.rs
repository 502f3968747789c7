//! Last successful result per refresh scope.
//!
//! Entries are kept as raw JSON and decoded on read, so a corrupted entry
//! (for example one written by an interrupted run) is detected and dropped
//! rather than served.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::records::DiscoveredRecord;
use crate::scope::RefreshScope;

const CACHE_TARGET: &str = "envscout_locator::cache";

/// File name of the persisted cache inside the cache directory.
pub const CACHE_FILE_NAME: &str = "refresh-cache.json";

/// Errors raised while persisting the cache.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Reading or writing the cache file failed.
    #[error("cache file {}: {source}", .path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The cache could not be encoded.
    #[error("failed to encode cache: {0}")]
    Encode(#[source] Arc<serde_json::Error>),
}

fn io_error(path: &Path, source: io::Error) -> CacheError {
    CacheError::Io {
        path: path.to_path_buf(),
        source: Arc::new(source),
    }
}

/// Scope-keyed store of discovery results.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<BTreeMap<String, Value>>,
    path: Option<PathBuf>,
}

impl ResultCache {
    /// Creates an empty, memory-only cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a cache persisted at `location`.
    ///
    /// A missing or unreadable file yields an empty cache.
    #[must_use]
    pub fn open(location: impl Into<PathBuf>) -> Self {
        let path = location.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|error| {
                warn!(
                    target: CACHE_TARGET,
                    path = %path.display(),
                    error = %error,
                    "ignoring malformed cache file"
                );
                BTreeMap::new()
            }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                warn!(
                    target: CACHE_TARGET,
                    path = %path.display(),
                    error = %error,
                    "failed to read cache file"
                );
                BTreeMap::new()
            }
        };
        Self {
            entries: Mutex::new(entries),
            path: Some(path),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.entries.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Returns the well-formed entry for `scope`. A malformed entry is
    /// removed and reported as absent.
    #[must_use]
    pub fn get(&self, scope: &RefreshScope) -> Option<Vec<DiscoveredRecord>> {
        let key = scope.cache_key();
        let mut entries = self.lock();
        let value = entries.get(&key)?;
        match serde_json::from_value(value.clone()) {
            Ok(records) => Some(records),
            Err(error) => {
                warn!(
                    target: CACHE_TARGET,
                    %scope,
                    error = %error,
                    "dropping malformed cache entry"
                );
                entries.remove(&key);
                None
            }
        }
    }

    /// Stores `records` as the entry for `scope`.
    pub fn put(&self, scope: &RefreshScope, records: &[DiscoveredRecord]) {
        match serde_json::to_value(records) {
            Ok(value) => self.put_value(scope, value),
            Err(error) => {
                warn!(target: CACHE_TARGET, %scope, error = %error, "failed to encode records");
            }
        }
    }

    /// Stores an undecoded entry; it is validated when read.
    pub fn put_value(&self, scope: &RefreshScope, value: Value) {
        debug!(target: CACHE_TARGET, %scope, "cache entry stored");
        self.lock().insert(scope.cache_key(), value);
    }

    /// Removes the entry for `scope`.
    pub fn invalidate(&self, scope: &RefreshScope) {
        if self.lock().remove(&scope.cache_key()).is_some() {
            debug!(target: CACHE_TARGET, %scope, "cache entry invalidated");
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, well-formed or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Writes the cache to its file, replacing the previous contents
    /// atomically. Memory-only caches do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the file cannot be written.
    pub fn flush(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(&*self.lock())
            .map_err(|error| CacheError::Encode(Arc::new(error)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| io_error(parent, error))?;
        }
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, bytes).map_err(|error| io_error(&staging, error))?;
        fs::rename(&staging, path).map_err(|error| io_error(path, error))?;

        debug!(target: CACHE_TARGET, path = %path.display(), "cache flushed");
        Ok(())
    }
}
