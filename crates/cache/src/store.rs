//! The cache store itself.
//!
//! Recency is tracked with a monotonically increasing access sequence
//! rather than wall-clock timestamps, so two accesses within the same clock
//! tick still have a well-defined order.  Expiry uses `tokio::time::Instant`
//! so tests can drive it with a paused clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use crate::CacheConfig;

/// Longest TTL an entry can get; longer ones are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Cumulative counters, read-only snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    /// `hits / (hits + misses)`, or `0.0` before the first lookup.
    pub hit_rate: f64,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

impl<V> CacheEntry<V> {
    // Valid up to and including `expires_at`.
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// access sequence → key, oldest first.
    recency: BTreeMap<u64, String>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> CacheState<V> {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn touch(&mut self, key: &str) {
        let seq = self.bump_seq();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.seq);
            entry.seq = seq;
            self.recency.insert(seq, key.to_owned());
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.seq);
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        self.evictions += 1;
        Some(key)
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Thread-safe TTL + LRU cache.
///
/// Every operation takes the same internal lock, so a `set` racing with an
/// eviction of the same key is serialised instead of losing an update.
pub struct Cache<V> {
    config: CacheConfig,
    state: Mutex<CacheState<V>>,
}

impl<V: Clone> Cache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_seq: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `key` with `ttl` (or the configured default).
    ///
    /// When the key is new and the cache is full, the single
    /// least-recently-accessed entry is evicted first.  A TTL above
    /// [`MAX_TTL`] is clamped to it.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        if self.config.max_size == 0 {
            return;
        }

        let key = key.into();
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.config.default_ttl).min(MAX_TTL);
        let expires_at = now + ttl;
        let mut state = self.lock();

        if state.remove(&key).is_some() {
            trace!(key = %key, "replacing cache entry");
        } else if state.entries.len() >= self.config.max_size {
            if let Some(evicted) = state.evict_lru() {
                trace!(key = %evicted, "evicted least-recently-used cache entry");
            }
        }

        let seq = state.bump_seq();
        state.recency.insert(seq, key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                seq,
            },
        );
    }

    /// Look up `key`.  A hit refreshes the entry's recency; an expired entry
    /// is purged and counted as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut state = self.lock();

        let expired = match state.entries.get(key) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.remove(key);
            state.misses += 1;
            return None;
        }

        state.hits += 1;
        state.touch(key);
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Same expiry check as [`Cache::get`] without refreshing recency or
    /// touching the hit/miss counters.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.lock();

        match state.entries.get(key).map(|entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                state.remove(key);
                false
            }
            None => false,
        }
    }

    /// Remove `key`, returning whether a live entry was present.
    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        state
            .remove(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Drop every entry.  Counters are cumulative and survive a clear.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.recency.clear();
    }

    /// Eagerly drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            size: state.entries.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    /// Serve `key` from the cache, or compute it with `f`, store it and
    /// return it.  Errors from `f` are returned and nothing is stored.
    ///
    /// The lock is not held while `f` runs.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = f().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }
}

impl<V: Clone> Default for Cache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
