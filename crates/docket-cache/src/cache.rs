//! LRU + TTL result cache with an optional write-behind persistence adapter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::lru::LruList;
use crate::metrics::{self, HitSource};
use crate::persistence::{CachePersistence, PersistedEntry};

/// Stand-in expiry for TTLs too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Label used in logs and metrics
    pub name: String,
    /// Maximum number of in-memory entries
    pub max_size: usize,
    /// TTL applied by [`ResultCache::set`]
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "results".to_string(),
            max_size: 1000,
            default_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

impl CacheConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name: defaults.name,
            max_size: std::env::var("CACHE_MAX_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            default_ttl: std::env::var("CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_ttl),
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered, from memory or the adapter
    pub hits: u64,
    /// Of `hits`, those answered by the adapter
    pub persistence_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
}

struct CacheEntry<V> {
    value: V,
    node: usize,
    expires_at: Instant,
    access_count: u64,
}

enum Lookup<V> {
    Hit(V),
    Expired,
    Missing,
}

/// Entries plus their recency order. Always locked as a unit.
struct Entries<V> {
    map: HashMap<String, CacheEntry<V>>,
    order: LruList,
    max_size: usize,
}

impl<V: Clone> Entries<V> {
    fn new(max_size: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: LruList::new(),
            max_size: max_size.max(1),
        }
    }

    fn lookup(&mut self, key: &str, now: Instant) -> Lookup<V> {
        let Some(entry) = self.map.get_mut(key) else {
            return Lookup::Missing;
        };

        if entry.expires_at <= now {
            self.remove(key);
            return Lookup::Expired;
        }

        entry.access_count += 1;
        let value = entry.value.clone();
        let node = entry.node;
        self.order.touch(node);
        Lookup::Hit(value)
    }

    /// Insert or overwrite, returning the key evicted to make room.
    fn insert(&mut self, key: String, value: V, expires_at: Instant) -> Option<String> {
        if let Some(entry) = self.map.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            let node = entry.node;
            self.order.touch(node);
            return None;
        }

        let evicted = if self.map.len() >= self.max_size {
            self.order.pop_back().inspect(|lru_key| {
                self.map.remove(lru_key);
            })
        } else {
            None
        };

        let node = self.order.push_front(key.clone());
        self.map.insert(
            key,
            CacheEntry {
                value,
                node,
                expires_at,
                access_count: 0,
            },
        );
        evicted
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.map.remove(key) {
            Some(entry) => {
                self.order.remove(entry.node);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

#[derive(Clone)]
enum WriteOp {
    Store(PersistedEntry),
    Remove,
}

struct PendingWrite {
    op: WriteOp,
    generation: u64,
}

/// Write-behind queue with per-key coalescing.
///
/// A key present in `pending` has exactly one drain task alive. New writes
/// for that key replace the pending op; the task keeps writing until the
/// op it wrote is the newest one.
struct WriteQueue {
    cache_name: String,
    adapter: Arc<dyn CachePersistence>,
    pending: Mutex<HashMap<String, PendingWrite>>,
    next_generation: AtomicU64,
    drained: Notify,
}

impl WriteQueue {
    fn submit(self: &Arc<Self>, key: String, op: WriteOp) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let needs_task = {
            let mut pending = self.pending.lock();
            pending
                .insert(key.clone(), PendingWrite { op, generation })
                .is_none()
        };

        if needs_task {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.drain_key(key).await });
        }
    }

    async fn drain_key(&self, key: String) {
        loop {
            let next = {
                let pending = self.pending.lock();
                pending
                    .get(&key)
                    .map(|write| (write.op.clone(), write.generation))
            };
            let Some((op, generation)) = next else {
                self.drained.notify_waiters();
                return;
            };

            let (operation, result) = match &op {
                WriteOp::Store(entry) => ("store", self.adapter.store(&key, entry).await),
                WriteOp::Remove => ("remove", self.adapter.remove(&key).await),
            };
            if let Err(e) = result {
                warn!(cache = %self.cache_name, key = %key, operation, error = %e, "Cache persistence write failed");
                metrics::record_persistence_error(&self.cache_name, operation);
            }

            let finished = {
                let mut pending = self.pending.lock();
                match pending.get(&key) {
                    Some(write) if write.generation == generation => {
                        pending.remove(&key);
                        true
                    }
                    Some(_) => false,
                    None => true,
                }
            };

            if finished {
                self.drained.notify_waiters();
                return;
            }
        }
    }

    async fn flush(&self) {
        loop {
            let drained = self.drained.notified();
            if self.pending.lock().is_empty() {
                return;
            }
            drained.await;
        }
    }
}

/// Content-addressed result cache.
///
/// Bounded in size (least recently used entry evicted first) and in time
/// (per-entry TTL). With a persistence adapter, misses fall through to the
/// adapter and writes are forwarded to it in the background.
pub struct ResultCache<V> {
    config: CacheConfig,
    entries: Mutex<Entries<V>>,
    writes: Option<Arc<WriteQueue>>,
    hits: AtomicU64,
    persistence_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V> ResultCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// In-memory only cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(Entries::new(config.max_size)),
            config,
            writes: None,
            hits: AtomicU64::new(0),
            persistence_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Cache backed by a persistence adapter.
    pub fn with_persistence(config: CacheConfig, adapter: Arc<dyn CachePersistence>) -> Self {
        let mut cache = Self::new(config);
        cache.writes = Some(Arc::new(WriteQueue {
            cache_name: cache.config.name.clone(),
            adapter,
            pending: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            drained: Notify::new(),
        }));
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look a key up, falling through to the adapter on a local miss.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let local = self.entries.lock().lookup(key, now);

        match local {
            Lookup::Hit(value) => {
                debug!(cache = %self.config.name, key = %key, "Cache hit");
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_hit(&self.config.name, HitSource::Memory);
                return Some(value);
            }
            Lookup::Expired => {
                debug!(cache = %self.config.name, key = %key, "Cache entry expired");
            }
            Lookup::Missing => {}
        }

        if let Some(value) = self.load_persisted(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.persistence_hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_hit(&self.config.name, HitSource::Persistence);
            return Some(value);
        }

        debug!(cache = %self.config.name, key = %key, "Cache miss");
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_miss(&self.config.name);
        None
    }

    async fn load_persisted(&self, key: &str) -> Option<V> {
        let writes = self.writes.as_ref()?;

        let entry = match writes.adapter.load(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(cache = %self.config.name, key = %key, error = %e, "Cache persistence read failed");
                metrics::record_persistence_error(&self.config.name, "load");
                return None;
            }
        };

        let remaining = (entry.expires_at - Utc::now()).to_std().ok()?;
        if remaining.is_zero() {
            return None;
        }

        let value: V = match serde_json::from_value(entry.value) {
            Ok(value) => value,
            Err(e) => {
                warn!(cache = %self.config.name, key = %key, error = %e, "Discarding undecodable persisted cache entry");
                return None;
            }
        };

        // Backfill without clobbering a value set while the load was in flight
        let expires_at = local_expiry(Instant::now(), remaining);
        let evicted = {
            let mut entries = self.entries.lock();
            if entries.map.contains_key(key) {
                None
            } else {
                entries.insert(key.to_string(), value.clone(), expires_at)
            }
        };
        self.note_eviction(evicted);

        debug!(cache = %self.config.name, key = %key, "Cache backfilled from persistence");
        Some(value)
    }

    /// Insert with the default TTL.
    pub async fn set(&self, key: impl Into<String>, value: V) {
        let ttl = self.config.default_ttl;
        self.set_with_ttl(key, value, ttl).await;
    }

    /// Insert or overwrite with an explicit TTL.
    pub async fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();

        let persisted = self.writes.as_ref().and_then(|_| {
            match serde_json::to_value(&value) {
                Ok(json) => Some(PersistedEntry {
                    value: json,
                    expires_at: wall_clock_expiry(ttl),
                }),
                Err(e) => {
                    warn!(cache = %self.config.name, key = %key, error = %e, "Cache value not serializable; skipping persistence");
                    None
                }
            }
        });

        let evicted = self
            .entries
            .lock()
            .insert(key.clone(), value, local_expiry(Instant::now(), ttl));
        self.note_eviction(evicted);

        if let (Some(writes), Some(entry)) = (&self.writes, persisted) {
            writes.submit(key, WriteOp::Store(entry));
        }
    }

    /// Remove a key locally and from the adapter.
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.entries.lock().remove(key);
        if let Some(writes) = &self.writes {
            writes.submit(key.to_string(), WriteOp::Remove);
        }
        removed
    }

    /// Drop every entry locally and in the adapter.
    ///
    /// Writes already queued are drained first so they cannot land after
    /// the adapter is cleared.
    pub async fn clear(&self) {
        self.entries.lock().clear();

        if let Some(writes) = &self.writes {
            writes.flush().await;
            if let Err(e) = writes.adapter.clear().await {
                warn!(cache = %self.config.name, error = %e, "Cache persistence clear failed");
                metrics::record_persistence_error(&self.config.name, "clear");
            }
        }
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .map
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        expired.len()
    }

    /// Wait until every queued adapter write has completed.
    pub async fn flush(&self) {
        if let Some(writes) = &self.writes {
            writes.flush().await;
        }
    }

    /// Number of in-memory entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times a live entry has been read, without promoting it.
    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.entries.lock().map.get(key).map(|e| e.access_count)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            persistence_hits: self.persistence_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: self.len(),
        }
    }

    fn note_eviction(&self, evicted: Option<String>) {
        if let Some(key) = evicted {
            debug!(cache = %self.config.name, key = %key, "Evicted least recently used entry");
            self.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::record_eviction(&self.config.name);
        }
    }
}

fn local_expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or(now + FAR_FUTURE)
}

fn wall_clock_expiry(ttl: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
