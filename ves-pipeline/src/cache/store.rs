use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::observability::metrics as obs;

/// What a backend stores per key. Payloads cross the backend boundary as
/// JSON values so a remote key-value service can be plugged in behind the
/// same trait as the in-process map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub payload: serde_json::Value,
    pub written_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl StoredEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.written_at).num_seconds() > self.ttl_secs as i64
    }
}

/// Pluggable cache backend. `read` counts as an access for recency purposes;
/// `peek` does not, so sweeps never distort the eviction order.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn read(&self, key: &str) -> Option<StoredEntry>;
    async fn peek(&self, key: &str) -> Option<StoredEntry>;
    async fn write(&self, key: &str, entry: StoredEntry);
    async fn remove(&self, key: &str) -> bool;
    async fn clear(&self);
    async fn len(&self) -> usize;
    async fn keys(&self) -> Vec<String>;
}

struct Slot {
    entry: StoredEntry,
    last_access: u64,
}

struct MemoryInner {
    slots: HashMap<String, Slot>,
    access_clock: u64,
}

/// In-process backend with a hard key capacity. When full, the
/// least-recently-accessed key is evicted; access time is tracked
/// independently of write time.
pub struct MemoryBackend {
    capacity: usize,
    inner: Mutex<MemoryInner>,
}

impl MemoryBackend {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(MemoryInner {
                slots: HashMap::new(),
                access_clock: 0,
            }),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Option<StoredEntry> {
        let mut inner = self.inner.lock().await;
        inner.access_clock += 1;
        let stamp = inner.access_clock;
        let slot = inner.slots.get_mut(key)?;
        slot.last_access = stamp;
        Some(slot.entry.clone())
    }

    async fn peek(&self, key: &str) -> Option<StoredEntry> {
        let inner = self.inner.lock().await;
        inner.slots.get(key).map(|s| s.entry.clone())
    }

    async fn write(&self, key: &str, entry: StoredEntry) {
        let mut inner = self.inner.lock().await;
        inner.access_clock += 1;
        let stamp = inner.access_clock;
        if !inner.slots.contains_key(key) && inner.slots.len() >= self.capacity {
            // Evict the coldest key to make room.
            if let Some(victim) = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(k, _)| k.clone())
            {
                debug!(key = %victim, "cache capacity reached, evicting LRU entry");
                inner.slots.remove(&victim);
                obs::cache::eviction();
            }
        }
        inner.slots.insert(
            key.to_string(),
            Slot {
                entry,
                last_access: stamp,
            },
        );
    }

    async fn remove(&self, key: &str) -> bool {
        self.inner.lock().await.slots.remove(key).is_some()
    }

    async fn clear(&self) {
        self.inner.lock().await.slots.clear();
    }

    async fn len(&self) -> usize {
        self.inner.lock().await.slots.len()
    }

    async fn keys(&self) -> Vec<String> {
        self.inner.lock().await.slots.keys().cloned().collect()
    }
}

/// Typed TTL cache over a pluggable backend.
///
/// Expiry is lazy on `get` and additionally handled by `sweep_expired`, so
/// stale entries are never served even between sweeps. A payload that no
/// longer deserializes is dropped and reported as a miss rather than
/// surfaced to callers.
pub struct CacheStore<T> {
    backend: Arc<dyn CacheBackend>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CacheStore<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            _marker: PhantomData,
        }
    }
}

impl<T> CacheStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            _marker: PhantomData,
        }
    }

    /// Convenience constructor over the in-process backend.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(Arc::new(MemoryBackend::new(capacity)))
    }

    pub async fn set(&self, key: &str, value: &T, ttl_secs: u64) {
        let payload = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize cache payload, skipping write");
                return;
            }
        };
        self.backend
            .write(
                key,
                StoredEntry {
                    payload,
                    written_at: Utc::now(),
                    ttl_secs,
                },
            )
            .await;
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let entry = match self.backend.read(key).await {
            Some(e) => e,
            None => {
                obs::cache::miss();
                return None;
            }
        };
        if entry.is_expired(Utc::now()) {
            self.backend.remove(key).await;
            obs::cache::expired();
            obs::cache::miss();
            return None;
        }
        match serde_json::from_value(entry.payload) {
            Ok(value) => {
                obs::cache::hit();
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "corrupt cache payload, dropping entry");
                self.backend.remove(key).await;
                obs::cache::corrupt();
                obs::cache::miss();
                None
            }
        }
    }

    /// Presence check without bumping recency.
    pub async fn has(&self, key: &str) -> bool {
        match self.backend.peek(key).await {
            Some(entry) if entry.is_expired(Utc::now()) => {
                self.backend.remove(key).await;
                obs::cache::expired();
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.backend.remove(key).await
    }

    pub async fn clear(&self) {
        self.backend.clear().await;
    }

    pub async fn size(&self) -> usize {
        self.backend.len().await
    }

    pub async fn keys(&self) -> Vec<String> {
        self.backend.keys().await
    }

    /// Drop every entry whose TTL has lapsed. Returns the number removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for key in self.backend.keys().await {
            if let Some(entry) = self.backend.peek(&key).await {
                if entry.is_expired(now) && self.backend.remove(&key).await {
                    obs::cache::expired();
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
        removed
    }

    /// Background sweep task. The handle is owned by the composing
    /// application, which decides its lifecycle; the store itself keeps no
    /// global state.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.sweep_expired().await;
            }
        })
    }

    pub(crate) fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }
}
