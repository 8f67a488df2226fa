//! TTL query cache and the caching adapter decorator.
//!
//! Reads are memoized per table, keyed by the serialized `(filter, options)`
//! pair; `select` and `count` results live in separate namespaces. Entries
//! expire passively after the TTL. Any write through the decorator clears
//! both namespaces of its table, whether the write succeeded or not.
//!
//! Every clear bumps a generation counter. A read stores its result only if
//! no clear happened since it started, so a read that raced a write never
//! caches what it saw before the write.

use super::{StorageAdapter, acquire_lock};
use crate::config::CacheConfig;
use crate::models::{CountResult, Filter, QueryOptions, Record, UpdateData};
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry<T> {
    data: T,
    stored_at: Instant,
}

/// In-memory read cache for one table.
pub struct QueryCache {
    table: String,
    ttl: Duration,
    selects: Mutex<LruCache<String, CacheEntry<Vec<Record>>>>,
    counts: Mutex<LruCache<String, CacheEntry<CountResult>>>,
    generation: AtomicU64,
}

impl QueryCache {
    /// Creates an empty cache for `table`.
    #[must_use]
    pub fn new(table: impl Into<String>, config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            table: table.into(),
            ttl: Duration::from_secs(config.ttl_secs),
            selects: Mutex::new(LruCache::new(capacity)),
            counts: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
        }
    }

    /// Cache key for a query shape. `None` if the shape cannot be serialized.
    fn key(filter: &Filter, options: &QueryOptions) -> Option<String> {
        serde_json::to_string(&(filter, options)).ok()
    }

    fn lookup<T: Clone>(
        &self,
        namespace: &Mutex<LruCache<String, CacheEntry<T>>>,
        kind: &'static str,
        key: &str,
    ) -> Option<T> {
        let mut entries = acquire_lock(namespace);
        let found = entries
            .get(key)
            .map(|entry| (entry.stored_at.elapsed() < self.ttl).then(|| entry.data.clone()));
        let hit = match found {
            Some(Some(data)) => Some(data),
            Some(None) => {
                entries.pop(key);
                None
            },
            None => None,
        };
        drop(entries);

        let status = if hit.is_some() { "hit" } else { "miss" };
        tracing::debug!(table = %self.table, kind, status, "Query cache lookup");
        if hit.is_some() {
            metrics::counter!("storage_cache_hits_total", "kind" => kind).increment(1);
        } else {
            metrics::counter!("storage_cache_misses_total", "kind" => kind).increment(1);
        }
        hit
    }

    /// Cached `select` result for this query shape.
    #[must_use]
    pub fn get_select(&self, filter: &Filter, options: &QueryOptions) -> Option<Vec<Record>> {
        let key = Self::key(filter, options)?;
        self.lookup(&self.selects, "select", &key)
    }

    /// Stores a `select` result read at `generation`.
    pub fn put_select(
        &self,
        generation: u64,
        filter: &Filter,
        options: &QueryOptions,
        data: Vec<Record>,
    ) {
        self.store(&self.selects, "select", generation, filter, options, data);
    }

    /// Cached `count` result for this query shape.
    #[must_use]
    pub fn get_count(&self, filter: &Filter, options: &QueryOptions) -> Option<CountResult> {
        let key = Self::key(filter, options)?;
        self.lookup(&self.counts, "count", &key)
    }

    /// Stores a `count` result read at `generation`.
    pub fn put_count(
        &self,
        generation: u64,
        filter: &Filter,
        options: &QueryOptions,
        data: CountResult,
    ) {
        self.store(&self.counts, "count", generation, filter, options, data);
    }

    fn store<T>(
        &self,
        namespace: &Mutex<LruCache<String, CacheEntry<T>>>,
        kind: &'static str,
        generation: u64,
        filter: &Filter,
        options: &QueryOptions,
        data: T,
    ) {
        let Some(key) = Self::key(filter, options) else {
            return;
        };
        let mut entries = acquire_lock(namespace);
        // Checked under the namespace lock; `clear` bumps before it takes it.
        if self.generation() != generation {
            tracing::debug!(table = %self.table, kind, "Dropping result read before a write");
            return;
        }
        entries.put(
            key,
            CacheEntry {
                data,
                stored_at: Instant::now(),
            },
        );
    }

    /// Current generation; pass it to `put_*` for a read started now.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Drops every entry of both namespaces.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        acquire_lock(&self.selects).clear();
        acquire_lock(&self.counts).clear();
        tracing::debug!(table = %self.table, "Query cache cleared");
        metrics::counter!("storage_cache_invalidations_total").increment(1);
    }

    /// Number of live and expired entries across both namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.selects).len() + acquire_lock(&self.counts).len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Adapter decorator serving reads from a [`QueryCache`].
pub struct CachedAdapter<A> {
    inner: A,
    cache: QueryCache,
}

impl<A: StorageAdapter> CachedAdapter<A> {
    /// Wraps `inner` with a fresh cache.
    #[must_use]
    pub fn new(inner: A, config: &CacheConfig) -> Self {
        let cache = QueryCache::new(inner.table(), config);
        Self { inner, cache }
    }

    /// The cache owned by this adapter.
    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// The wrapped adapter.
    #[must_use]
    pub const fn inner(&self) -> &A {
        &self.inner
    }
}

#[async_trait]
impl<A: StorageAdapter> StorageAdapter for CachedAdapter<A> {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    fn table(&self) -> &str {
        self.inner.table()
    }

    async fn select(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>> {
        if let Some(hit) = self.cache.get_select(filter, options) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let data = self.inner.select(filter, options).await?;
        self.cache.put_select(generation, filter, options, data.clone());
        Ok(data)
    }

    async fn count(&self, filter: &Filter, options: &QueryOptions) -> Result<CountResult> {
        if let Some(hit) = self.cache.get_count(filter, options) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let data = self.inner.count(filter, options).await?;
        self.cache.put_count(generation, filter, options, data.clone());
        Ok(data)
    }

    async fn add(&self, record: Record) -> Result<Record> {
        let result = self.inner.add(record).await;
        self.cache.clear();
        result
    }

    async fn update(&self, data: &UpdateData, filter: &Filter) -> Result<Vec<Record>> {
        let result = self.inner.update(data, filter).await;
        self.cache.clear();
        result
    }

    async fn delete(&self, filter: &Filter) -> Result<()> {
        let result = self.inner.delete(filter).await;
        self.cache.clear();
        result
    }

    async fn set_sequence(&self, next_id: u64) -> Result<()> {
        self.inner.set_sequence(next_id).await
    }
}
