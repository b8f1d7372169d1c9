//! # TTL cache
//!
//! Get-or-compute cache over an injected [`KeyValueStore`]. Every value is
//! written as a [`CacheEntry`] under `<prefix><key>`; the payload goes through
//! the type-preserving [`Codec`] so big integers and dates survive a restart.
//!
//! ## Failure policy
//!
//! - [`TtlCache::get`] never fails because of the cache. Unreadable or stale
//!   entries count as misses and persistence errors are logged. Only the
//!   producer's own error comes back.
//! - [`TtlCache::save`] and [`TtlCache::save_pending`] always hand back the
//!   value, whether or not it reached the store.
//! - [`TtlCache::retrieve`] and [`TtlCache::pop`] are strict.
//!
//! ## Concurrency
//!
//! With `coalesce_producers` on (the default) concurrent `get` calls for the
//! same key wait on a per-key guard, and only the first one runs its
//! producer. With it off, the writes race and the last one wins.

use crate::codec::{Codec, CodecError};
use crate::metrics;
use crate::settings::{CacheBackend, CacheSettings};
use crate::store::{FileStore, KeyValueStore, MemoryStore, StoreError};
use crate::utils::now_millis;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_PREFIX: &str = "network-cache-";
pub const DEFAULT_TTL_MS: i64 = 30_000;

/// Number of `-`-separated key segments compared by [`TtlCache::clear`].
const GROUP_SEGMENTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("no cached data for `{0}`")]
    Miss(String),
    #[error("cached data for `{key}` is unreadable: {reason}")]
    Corrupted { key: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Stored form of one cached value. Times are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub ts: i64,
    pub ttl: i64,
    /// Codec text of the cached value.
    pub data: String,
}

impl CacheEntry {
    pub fn is_stale(&self, now: i64) -> bool {
        now - self.ts >= self.ttl
    }
}

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        now_millis()
    }
}

/// Hand-driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_millis(&self) -> i64 {
        (**self).now_millis()
    }
}

pub struct TtlCache {
    store: Arc<dyn KeyValueStore>,
    codec: Codec,
    clock: Arc<dyn Clock>,
    default_ttl: i64,
    prefix: String,
    coalesce: bool,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

/// Held while a coalesced `get` owns its key. Releases the key's map entry
/// on every exit path, including a caller dropping the future mid-producer.
struct InFlightSlot<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        // The map and our guard hold the only references when nobody else waits.
        self.map.remove_if(self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("prefix", &self.prefix)
            .field("default_ttl", &self.default_ttl)
            .field("coalesce", &self.coalesce)
            .finish()
    }
}

impl TtlCache {
    pub fn new(store: Arc<dyn KeyValueStore>, default_ttl_ms: i64) -> Self {
        Self {
            store,
            codec: Codec::new(),
            clock: Arc::new(SystemClock),
            default_ttl: default_ttl_ms,
            prefix: DEFAULT_PREFIX.to_string(),
            coalesce: true,
            in_flight: DashMap::new(),
        }
    }

    /// In-memory cache with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), DEFAULT_TTL_MS)
    }

    /// Builds the cache and its backend from configuration.
    pub async fn from_settings(settings: &CacheSettings) -> Result<Self, StoreError> {
        let store: Arc<dyn KeyValueStore> = match settings.backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new()),
            CacheBackend::File => Arc::new(FileStore::open(&settings.file_path).await?),
            #[cfg(feature = "redis")]
            CacheBackend::Redis => {
                let store = crate::redis_manager::RedisStore::connect(&settings.redis_url)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Arc::new(store)
            }
            #[cfg(not(feature = "redis"))]
            CacheBackend::Redis => {
                return Err(StoreError::Backend(
                    "Redis feature not enabled. Enable with 'redis' feature flag.".to_string(),
                ))
            }
        };
        info!(
            "Cache ready: backend={:?} prefix={} ttl={}ms",
            settings.backend, settings.prefix, settings.default_ttl_ms
        );
        Ok(Self::new(store, settings.default_ttl_ms)
            .with_prefix(settings.prefix.clone())
            .coalesce_producers(settings.coalesce_producers))
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn coalesce_producers(mut self, enabled: bool) -> Self {
        self.coalesce = enabled;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn default_ttl(&self) -> i64 {
        self.default_ttl
    }

    /// Store key for a caller key.
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Returns the cached value for `key` if fresh, otherwise runs `producer`,
    /// stores its result and returns it.
    pub async fn get<T, E, F, Fut>(&self, key: &str, producer: F, ttl: Option<i64>) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let full_key = self.full_key(key);
        if let Some(value) = self.lookup_fresh(&full_key).await {
            return Ok(value);
        }

        if !self.coalesce {
            return self.produce(&full_key, producer, ttl).await;
        }

        let lock = self.in_flight.entry(full_key.clone()).or_default().clone();
        let _slot = InFlightSlot {
            map: &self.in_flight,
            key: &full_key,
            _guard: lock.lock_owned().await,
        };
        // Another caller may have filled the entry while we waited.
        match self.lookup_fresh(&full_key).await {
            Some(value) => Ok(value),
            None => self.produce(&full_key, producer, ttl).await,
        }
    }

    async fn produce<T, E, F, Fut>(&self, full_key: &str, producer: F, ttl: Option<i64>) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = producer().await?;
        self.persist_logged(full_key, &value, ttl).await;
        Ok(value)
    }

    /// Stores `value` under `key`. Never fails; a `null` value is not stored.
    pub async fn save<T: Serialize>(&self, key: &str, value: T, ttl: Option<i64>) -> T {
        let full_key = self.full_key(key);
        self.persist_logged(&full_key, &value, ttl).await;
        value
    }

    /// Awaits `pending` and stores its successful result.
    pub async fn save_pending<T, E, Fut>(&self, key: &str, pending: Fut, ttl: Option<i64>) -> Result<T, E>
    where
        T: Serialize,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = pending.await?;
        Ok(self.save(key, value, ttl).await)
    }

    /// Reads `key` regardless of freshness.
    pub async fn retrieve<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let full_key = self.full_key(key);
        let entry = self
            .read_entry(&full_key)
            .await?
            .ok_or_else(|| CacheError::Miss(full_key.clone()))?;
        self.decode_data(&full_key, &entry)
    }

    /// Removes `key` and returns what it held, fresh or not.
    pub async fn pop<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let full_key = self.full_key(key);
        let entry = self.read_entry(&full_key).await;
        self.store.delete(&full_key).await?;
        match entry? {
            Some(entry) => self.decode_data(&full_key, &entry).map(Some),
            None => Ok(None),
        }
    }

    /// True when forced, absent, unreadable or expired. Takes the full store key.
    pub async fn needs_update(&self, full_key: &str, force: bool) -> bool {
        if force {
            return true;
        }
        match self.read_entry(full_key).await {
            Ok(Some(entry)) => entry.is_stale(self.clock.now_millis()),
            Ok(None) => true,
            Err(e) => {
                warn!("Treating `{}` as expired: {}", full_key, e);
                true
            }
        }
    }

    /// Deletes every expired entry under the prefix. Unreadable entries are
    /// left in place; [`TtlCache::clear`] removes them.
    pub async fn cleanup(&self) -> Result<usize, CacheError> {
        let now = self.clock.now_millis();
        let mut evicted = 0;
        for full_key in self.store.keys(&self.prefix).await? {
            match self.read_entry(&full_key).await {
                Ok(Some(entry)) if entry.is_stale(now) => {
                    self.store.delete(&full_key).await?;
                    evicted += 1;
                }
                Ok(_) => {}
                Err(e) => debug!("cleanup: skipping `{}`: {}", full_key, e),
            }
        }
        if evicted > 0 {
            debug!("cleanup: evicted {} expired entries", evicted);
        }
        Ok(evicted)
    }

    /// Deletes everything under the prefix, or only the entries whose full key
    /// cut to its first three `-`-separated segments equals one of `groups`.
    pub async fn clear(&self, groups: Option<&[&str]>) -> Result<usize, CacheError> {
        let mut removed = 0;
        for full_key in self.store.keys(&self.prefix).await? {
            let matches = match groups {
                None => true,
                Some(groups) => {
                    let group = key_group(&full_key);
                    groups.iter().any(|g| *g == group)
                }
            };
            if matches {
                self.store.delete(&full_key).await?;
                removed += 1;
            }
        }
        debug!("clear({:?}): removed {} entries", groups, removed);
        Ok(removed)
    }

    /// Entry count under the prefix, expired ones included.
    pub async fn size(&self) -> Result<usize, CacheError> {
        let size = self.store.keys(&self.prefix).await?.len();
        metrics::set_cache_size(size as f64);
        Ok(size)
    }

    async fn lookup_fresh<T: DeserializeOwned>(&self, full_key: &str) -> Option<T> {
        let entry = match self.read_entry(full_key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                metrics::increment_cache_miss(full_key, "absent");
                return None;
            }
            Err(e) => {
                warn!("Ignoring cache entry `{}`: {}", full_key, e);
                metrics::increment_cache_miss(full_key, "unreadable");
                return None;
            }
        };

        if entry.is_stale(self.clock.now_millis()) {
            metrics::increment_cache_miss(full_key, "expired");
            return None;
        }

        match self.decode_data(full_key, &entry) {
            Ok(value) => {
                metrics::increment_cache_hit(full_key);
                Some(value)
            }
            Err(e) => {
                warn!("Ignoring cache entry `{}`: {}", full_key, e);
                metrics::increment_cache_miss(full_key, "unreadable");
                None
            }
        }
    }

    async fn read_entry(&self, full_key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(text) = self.store.read(full_key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| CacheError::Corrupted {
                key: full_key.to_string(),
                reason: e.to_string(),
            })
    }

    fn decode_data<T: DeserializeOwned>(&self, full_key: &str, entry: &CacheEntry) -> Result<T, CacheError> {
        self.codec
            .decode(&entry.data)
            .map_err(|e| CacheError::Corrupted {
                key: full_key.to_string(),
                reason: e.to_string(),
            })
    }

    /// Writes the entry. `Ok(false)` when the value encodes to `null`.
    async fn persist<T: Serialize + ?Sized>(
        &self,
        full_key: &str,
        value: &T,
        ttl: Option<i64>,
    ) -> Result<bool, CacheError> {
        let data = self.codec.encode(value)?;
        if data == "null" {
            warn!("Skipping cache save for {}: data is null", full_key);
            return Ok(false);
        }
        let entry = CacheEntry {
            ts: self.clock.now_millis(),
            ttl: ttl.unwrap_or(self.default_ttl),
            data,
        };
        let text = self.codec.encode(&entry)?;
        self.store.write(full_key, &text).await?;
        Ok(true)
    }

    async fn persist_logged<T: Serialize + ?Sized>(&self, full_key: &str, value: &T, ttl: Option<i64>) {
        if let Err(e) = self.persist(full_key, value, ttl).await {
            error!("Failed to save cache entry {}: {}", full_key, e);
            metrics::increment_cache_write_failure();
        }
    }
}

/// First three `-`-separated segments of a store key.
fn key_group(full_key: &str) -> String {
    full_key
        .split('-')
        .take(GROUP_SEGMENTS)
        .collect::<Vec<_>>()
        .join("-")
}
