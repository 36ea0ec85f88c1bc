//! Keyed cache with per-entry time-to-live
//!
//! Used for expensive read-only API results and for token-validity markers.
//! Entries are replaced on refresh, never mutated in place.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.ttl.saturating_sub(now.duration_since(self.stored_at))
    }
}

#[derive(Debug)]
struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    fetches: u64,
    total_fetch_time: Duration,
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries currently stored, fresh or stale
    pub entries: usize,
    /// Completed producer runs (successful or not)
    pub fetches: u64,
    pub total_fetch_time: Duration,
}

impl CacheStats {
    /// Fraction of lookups served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Mean time spent in the producer per fetch
    pub fn average_fetch_latency(&self) -> Duration {
        if self.fetches == 0 {
            Duration::ZERO
        } else {
            self.total_fetch_time.div_f64(self.fetches as f64)
        }
    }
}

/// Generic keyed TTL cache, cheap to clone and share across tasks
#[derive(Debug)]
pub struct TtlCache<K, V> {
    inner: Arc<Mutex<CacheInner<K, V>>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                fetches: 0,
                total_fetch_time: Duration::ZERO,
            })),
        }
    }

    /// Return the cached value if fresh, otherwise run `producer` once and store its result.
    ///
    /// The lock is released while the producer runs, so concurrent misses on the
    /// same key each run their own producer. Producer errors are not cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, ttl: Duration, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            let cached = inner
                .entries
                .get(&key)
                .filter(|entry| entry.is_fresh(now))
                .map(|entry| entry.value.clone());

            match cached {
                Some(value) => {
                    inner.hits += 1;
                    return Ok(value);
                }
                None => inner.misses += 1,
            }
        }

        let started = Instant::now();
        let result = producer().await;
        let elapsed = started.elapsed();

        let mut inner = self.inner.lock().await;
        inner.fetches += 1;
        inner.total_fetch_time += elapsed;

        let value = result?;
        inner.entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                stored_at: Instant::now(),
                ttl,
            },
        );

        Ok(value)
    }

    /// Fresh value for `key`, without touching hit/miss counters
    pub async fn get(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        inner
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    /// Store (or replace) a value directly
    pub async fn insert(&self, key: K, value: V, ttl: Duration) {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Present and not yet expired, counted as a hit or a miss
    pub async fn lookup(&self, key: &K) -> bool {
        let mut inner = self.inner.lock().await;
        let fresh = inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_fresh(Instant::now()));
        if fresh {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        fresh
    }

    /// Present and not yet expired, without touching hit/miss counters
    pub async fn is_valid(&self, key: &K) -> bool {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_fresh(Instant::now()))
    }

    /// Time left before `key` expires, if it is fresh
    pub async fn remaining_ttl(&self, key: &K) -> Option<Duration> {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        inner
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.remaining(now))
    }

    /// Remove one entry. Returns whether it existed.
    pub async fn invalidate(&self, key: &K) -> bool {
        self.inner.lock().await.entries.remove(key).is_some()
    }

    /// Remove every entry; counters are kept
    pub async fn invalidate_all(&self) {
        self.inner.lock().await.entries.clear();
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_fresh(now));
        before - inner.entries.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
            fetches: inner.fetches,
            total_fetch_time: inner.total_fetch_time,
        }
    }
}
