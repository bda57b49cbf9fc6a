//! Key-derived, TTL-based memoization for upstream fetches
//!
//! Request parameters are canonicalized (nulls pruned, object keys sorted by
//! serde_json's map ordering), serialized deterministically and hashed to a
//! fixed-length namespaced key, so logically identical requests collapse to
//! one entry regardless of field insertion order. Cache faults never reach
//! callers: a key that cannot be derived or a payload that cannot be stored
//! logs a warning and falls through to a direct fetch, since a cache outage
//! must not take down cost reporting.

use crate::clock::Clock;
use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default time-to-live for cached values
pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Key prefix shared by every entry
const KEY_PREFIX: &str = "costpipe";

/// Counters exposed through cache administration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Live entries (including not-yet-swept expired ones)
    pub entries: usize,
    /// Reads served from the store
    pub hits: u64,
    /// Reads that invoked the fetch function
    pub misses: u64,
    /// Entries removed by sweeps and invalidation
    pub evictions: u64,
}

struct CacheEntry {
    payload: serde_json::Value,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// TTL-based memoization wrapping any fetch function
///
/// The store is process-wide and safe for concurrent read/write. Concurrent
/// misses for one key race benignly: both fetch, last writer wins, and the
/// results are expected to be equal since they derive from the same query.
pub struct ResilientCache {
    store: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResilientCache {
    /// Create a cache with the given clock and default TTL
    pub fn new(clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            clock,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Derive the cache key for a namespaced request
    pub fn cache_key<P: Serialize>(namespace: &str, params: &P) -> Result<String> {
        let canonical = prune_nulls(serde_json::to_value(params)?);
        let serialized = serde_json::to_string(&canonical)?;
        let hash = blake3::hash(serialized.as_bytes());
        Ok(format!(
            "{KEY_PREFIX}:{namespace}:{}",
            &hash.to_hex().as_str()[..16]
        ))
    }

    /// Return the memoized value for `(namespace, params)` or fetch it.
    ///
    /// On a hit within TTL the stored value is returned without invoking
    /// `fetch`. On a miss or expiry, `fetch` runs and its result is stored
    /// under the configured TTL. Fetch errors propagate; cache faults do not.
    pub async fn wrap<T, F, Fut>(
        &self,
        namespace: &str,
        params: &impl Serialize,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = match Self::cache_key(namespace, params) {
            Ok(key) => key,
            Err(e) => {
                warn!(namespace, error = %e, "cache key derivation failed, fetching directly");
                return fetch().await;
            }
        };

        if let Some(stored) = self.get(&key).await {
            match serde_json::from_value(stored) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(%key, "cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(%key, error = %e, "stored payload unreadable, refetching");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = fetch().await?;

        match serde_json::to_value(&value) {
            Ok(payload) => {
                self.insert(key, payload, ttl.unwrap_or(self.default_ttl))
                    .await;
            }
            Err(e) => warn!(namespace, error = %e, "payload not cacheable"),
        }
        Ok(value)
    }

    /// Raw read; expired entries are logically absent
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = self.clock.now();
        let store = self.store.read().await;
        store
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.payload.clone())
    }

    /// Raw write under `ttl`
    pub async fn insert(&self, key: String, payload: serde_json::Value, ttl: Duration) {
        let entry = CacheEntry {
            payload,
            created_at: self.clock.now(),
            ttl,
        };
        self.store.write().await.insert(key, entry);
    }

    /// Remove entries whose key contains `pattern`, or everything when
    /// `pattern` is `None`. Returns the number of removed entries.
    pub async fn clear(&self, pattern: Option<&str>) -> usize {
        let mut store = self.store.write().await;
        let removed = match pattern {
            None => {
                let n = store.len();
                store.clear();
                n
            }
            Some(fragment) => {
                let before = store.len();
                store.retain(|key, _| !key.contains(fragment));
                before - store.len()
            }
        };
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        debug!(?pattern, removed, "cache cleared");
        removed
    }

    /// Evict expired entries now. Returns the number evicted.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut store = self.store.write().await;
        let before = store.len();
        store.retain(|_, entry| !entry.is_expired(now));
        let removed = before - store.len();
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "swept expired cache entries");
        }
        removed
    }

    /// Current counters
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.store.read().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Spawn the background sweeper, evicting expired entries every
    /// `interval` independent of access patterns.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                cache.clock.sleep(interval).await;
                cache.sweep().await;
            }
        })
    }
}

/// Recursively drop null values so that an unset optional field and an
/// absent field derive the same key
fn prune_nulls(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, prune_nulls(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(prune_nulls).collect())
        }
        other => other,
    }
}
