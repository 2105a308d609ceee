//! Content-addressed result cache using moka
//!
//! Memoizes per-(file, scope, target) results. The key includes a Blake3
//! hash of the file's current bytes, so a changed file is always a miss and
//! restoring the original bytes makes the old entry reachable again.

use crate::entry::{CacheEntry, CacheHit, CacheKey, EntryRecord};
use crate::error::CacheError;
use chrono::{DateTime, TimeDelta, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_common::{ContentHash, PathPattern};

const SNAPSHOT_VERSION: u32 = 1;

/// Cache tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction
    pub max_capacity: u64,
    /// Optional time-to-live for every entry
    #[serde(with = "strata_common::serde_ms::option")]
    pub time_to_live: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            time_to_live: None,
        }
    }
}

/// Snapshot of cache health
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    /// Entries currently stored
    pub total_entries: u64,
    /// Approximate memory held by entries
    pub approximate_bytes: u64,
    /// Hits this session
    pub hits: u64,
    /// Misses this session
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 before any lookup
    pub hit_rate: f64,
    /// Creation time of the oldest entry
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Creation time of the newest entry
    pub newest_entry: Option<DateTime<Utc>>,
    /// File whose entries were accessed most
    pub most_accessed_file: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<EntryRecord>,
}

/// Content-addressed cache
///
/// Cheap to clone; clones share entries and counters.
#[derive(Debug, Clone)]
pub struct ContentCache {
    inner: Cache<CacheKey, Arc<CacheEntry>>,
    counters: Arc<Counters>,
}

impl ContentCache {
    /// Create new cache with max capacity
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self::from_config(&CacheConfig {
            max_capacity,
            time_to_live: None,
        })
    }

    /// Create cache from configuration
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);
        if let Some(ttl) = config.time_to_live {
            builder = builder.time_to_live(ttl);
        }
        Self {
            inner: builder.build(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Look up the result for `(path, scope, target)` at the file's current
    /// content.
    ///
    /// # Errors
    /// Returns [`CacheError::NotFound`] if the file cannot be read
    pub async fn lookup(
        &self,
        path: impl AsRef<Path>,
        scope: &str,
        target: &str,
    ) -> Result<Option<CacheHit>, CacheError> {
        let (file_path, hash) = match hash_file(path.as_ref()).await {
            Ok(found) => found,
            Err(err) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };
        let key = CacheKey::derive(&file_path, &hash, scope, target);

        match self.inner.get(&key).await {
            Some(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(file = %file_path, scope, target, key = %key, "cache hit");
                Ok(Some(entry.touch()))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Store `payload` for `(path, scope, target)` at the file's current
    /// content, replacing any previous entry under the same key.
    ///
    /// # Errors
    /// Returns [`CacheError::NotFound`] if the file cannot be read
    pub async fn store(
        &self,
        path: impl AsRef<Path>,
        scope: &str,
        target: &str,
        payload: Value,
    ) -> Result<CacheKey, CacheError> {
        let (file_path, hash) = hash_file(path.as_ref()).await?;
        let entry = CacheEntry::new(file_path, hash, scope, target, payload);
        let key = entry.key();
        self.inner.insert(key, Arc::new(entry)).await;
        Ok(key)
    }

    /// Remove every entry computed from `path`, whatever its content was
    pub async fn invalidate_file(&self, path: impl AsRef<Path>) -> usize {
        let wanted = path_key(path.as_ref());
        let removed = self
            .remove_where(|entry| entry.file_path() == wanted)
            .await;
        tracing::debug!(file = %wanted, removed, "invalidated file");
        removed
    }

    /// Remove every entry whose file path matches `pattern`
    pub async fn invalidate_pattern(&self, pattern: &PathPattern) -> usize {
        let removed = self
            .remove_where(|entry| pattern.is_match(entry.file_path()))
            .await;
        tracing::debug!(patterns = ?pattern.patterns(), removed, "invalidated pattern");
        removed
    }

    /// Remove everything
    pub async fn clear_all(&self) -> usize {
        let removed = self.remove_where(|_| true).await;
        tracing::info!(removed, "cache cleared");
        removed
    }

    /// Remove entries created at least `age` ago
    pub async fn prune_older_than(&self, age: Duration) -> usize {
        let age = TimeDelta::from_std(age).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();
        let removed = self
            .remove_where(|entry| now.signed_duration_since(entry.created_at()) >= age)
            .await;
        tracing::info!(removed, "pruned stale cache entries");
        removed
    }

    /// Number of live entries
    pub async fn len(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    /// Whether the cache holds no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current statistics
    pub async fn statistics(&self) -> CacheStatistics {
        self.inner.run_pending_tasks().await;

        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let mut stats = CacheStatistics {
            hits,
            misses,
            hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
            ..CacheStatistics::default()
        };

        let mut per_file: HashMap<String, u64> = HashMap::new();
        for (_, entry) in self.inner.iter() {
            stats.total_entries += 1;
            stats.approximate_bytes += entry.approximate_size();
            let created = entry.created_at();
            stats.oldest_entry = Some(stats.oldest_entry.map_or(created, |t| t.min(created)));
            stats.newest_entry = Some(stats.newest_entry.map_or(created, |t| t.max(created)));
            *per_file.entry(entry.file_path().to_string()).or_default() += entry.access_count();
        }

        stats.most_accessed_file = per_file
            .into_iter()
            .max_by(|(a_path, a), (b_path, b)| a.cmp(b).then_with(|| b_path.cmp(a_path)))
            .map(|(path, _)| path);
        stats
    }

    /// Write every entry to `path` as JSON; returns the number written
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<usize, CacheError> {
        self.inner.run_pending_tasks().await;
        let entries: Vec<EntryRecord> = self.inner.iter().map(|(_, e)| e.to_record()).collect();
        let count = entries.len();
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries,
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path.as_ref(), bytes).await?;
        tracing::info!(path = %path.as_ref().display(), entries = count, "cache snapshot saved");
        Ok(count)
    }

    /// Load entries from a snapshot written by [`ContentCache::save_snapshot`];
    /// returns the number loaded. A missing file loads nothing.
    ///
    /// # Errors
    /// Returns an error if the file is unreadable or malformed
    pub async fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<usize, CacheError> {
        let bytes = match tokio::fs::read(path.as_ref()).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CacheError::SnapshotVersion {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }
        let count = snapshot.entries.len();
        for record in snapshot.entries {
            let entry = CacheEntry::from_record(record);
            self.inner.insert(entry.key(), Arc::new(entry)).await;
        }
        tracing::info!(path = %path.as_ref().display(), entries = count, "cache snapshot loaded");
        Ok(count)
    }

    async fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let doomed: Vec<CacheKey> = self
            .inner
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| *key)
            .collect();
        for key in &doomed {
            self.inner.invalidate(key).await;
        }
        self.inner.run_pending_tasks().await;
        doomed.len()
    }
}

impl Default for ContentCache {
    /// Create cache with default capacity (10,000 entries)
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

fn path_key(path: &Path) -> String {
    let normalized = strata_common::pattern::normalize(path);
    match normalized.strip_prefix("./") {
        Some(rest) => rest.to_string(),
        None => normalized,
    }
}

async fn hash_file(path: &Path) -> Result<(String, ContentHash), CacheError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| CacheError::NotFound {
            path: path.to_path_buf(),
            source,
        })?;
    Ok((path_key(path), ContentHash::compute(&bytes)))
}
