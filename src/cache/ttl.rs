//! Bounded in-memory cache with per-entry expiry

use super::{cache_key, BlobCache, CacheFuture, CacheStats, Counters};
use crate::error::LakeResult;
use crate::singleflight::SingleFlight;
use ahash::AHashMap;
use bytes::Bytes;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

pub struct TtlCache {
    name: &'static str,
    ttl: Duration,
    capacity: usize,
    entries: Mutex<AHashMap<String, Entry>>,
    flights: SingleFlight<LakeResult<Bytes>>,
    counters: Counters,
}

impl TtlCache {
    pub fn new(name: &'static str, ttl: Duration, capacity: usize) -> Self {
        TtlCache {
            name,
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(AHashMap::new()),
            flights: SingleFlight::new(),
            counters: Counters::default(),
        }
    }

    /// Default delta cache: one minute TTL, 10k entries
    pub fn for_deltas() -> Self {
        Self::new("delta", Duration::from_secs(60), 10_000)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, full_key: &str) -> Option<Bytes> {
        let entries = self.entries.lock();
        entries
            .get(full_key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    fn insert(&self, full_key: String, value: Bytes) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&full_key) {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.capacity {
                // Evict whatever expires soonest
                let victim = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    entries.remove(&victim);
                }
            }
        }
        entries.insert(
            full_key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }
}

impl BlobCache for TtlCache {
    fn name(&self) -> &'static str {
        self.name
    }

    fn take<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        loader: CacheFuture<'a>,
    ) -> CacheFuture<'a> {
        Box::pin(async move {
            let full_key = cache_key(namespace, key);
            if let Some(hit) = self.lookup(&full_key) {
                self.counters.hit();
                return Ok(hit);
            }
            self.counters.miss();

            self.flights
                .run(&full_key, || async {
                    let value = loader.await?;
                    self.insert(full_key.clone(), value.clone());
                    Ok(value)
                })
                .await
        })
    }

    fn prime(&self, namespace: &str, key: &str, value: Bytes) {
        self.insert(cache_key(namespace, key), value);
    }

    fn invalidate(&self, namespace: &str, key: &str) {
        self.entries.lock().remove(&cache_key(namespace, key));
    }

    fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len())
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }
}
