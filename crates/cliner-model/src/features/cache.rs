//! Annotation cache for external feature sources
//!
//! Tagger output and lexicon lookups are expensive and deterministic, so
//! results are memoized by their input text. Entries are populated lazily and
//! never evicted or invalidated for the lifetime of the cache.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};

// ============================================================================
// Annotation Cache
// ============================================================================

/// Thread-safe key to result map with hit/miss accounting
#[derive(Clone)]
pub struct AnnotationCache<V> {
    entries: Cache<String, V>,
    stats: Arc<CacheStats>,
}

impl<V: Clone + Send + Sync + 'static> AnnotationCache<V> {
    /// Create an empty, unbounded cache
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            entries: Cache::builder().name(&name).build(),
            stats: Arc::new(CacheStats::new(name)),
        }
    }

    /// Look up a cached result, recording a hit or miss
    pub fn get(&self, key: &str) -> Option<V> {
        let result = self.entries.get(key);

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        result
    }

    /// Store a result
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
    }

    /// Return the cached value or compute, store and return it
    ///
    /// Concurrent callers for the same key wait for a single computation.
    pub fn get_with<F>(&self, key: &str, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        let computed = AtomicBool::new(false);
        let value = self.entries.get_with(key.to_string(), || {
            computed.store(true, Ordering::Relaxed);
            compute()
        });

        if computed.load(Ordering::Relaxed) {
            self.stats.record_miss();
        } else {
            self.stats.record_hit();
        }

        value
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl<V: Clone + Send + Sync + 'static> std::fmt::Debug for AnnotationCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationCache")
            .field("name", &self.stats.name())
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Statistics for cache performance monitoring
#[derive(Debug)]
pub struct CacheStats {
    /// Cache name for identification
    name: String,
    /// Total number of cache hits
    hits: AtomicU64,
    /// Total number of cache misses
    misses: AtomicU64,
}

impl CacheStats {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Get a summary report
    pub fn report(&self) -> CacheStatsReport {
        CacheStatsReport {
            name: self.name.clone(),
            hits: self.hits(),
            misses: self.misses(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

// ============================================================================
// Tests
// ============================================================================
