//! Blob caches for snapshot and delta bodies
//!
//! ```text
//! take(namespace, key, loader)
//!    ├─ hit  → cached bytes
//!    └─ miss → SingleFlight(namespace:key) → loader → store → bytes
//! ```
//!
//! Keys are salted with the blob store namespace so tenants sharing a cache
//! never alias. Loads always run through single-flight; failed loads are not
//! stored.

mod ttl;

pub use ttl::TtlCache;

use crate::error::LakeResult;
use crate::singleflight::SingleFlight;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub type CacheFuture<'a> = Pin<Box<dyn Future<Output = LakeResult<Bytes>> + Send + 'a>>;

/// Cache key for a blob within a namespace
pub fn cache_key(namespace: &str, key: &str) -> String {
    format!("{}:{}", namespace, key)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Read-through cache contract shared by the snapshot and delta tiers
pub trait BlobCache: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Return the cached bytes for `key`, or run `loader` once for all
    /// concurrent callers and cache its successful result.
    fn take<'a>(&'a self, namespace: &'a str, key: &'a str, loader: CacheFuture<'a>)
        -> CacheFuture<'a>;

    /// Insert a value produced elsewhere (e.g. a freshly saved snapshot)
    fn prime(&self, namespace: &str, key: &str, value: Bytes);

    fn invalidate(&self, namespace: &str, key: &str);

    fn stats(&self) -> CacheStats;

    /// Drop expired entries; returns how many were removed
    fn sweep(&self) -> usize {
        0
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// Stores nothing; still coalesces concurrent loads of the same key
#[derive(Default)]
pub struct NoopSnapCache {
    flights: SingleFlight<LakeResult<Bytes>>,
    counters: Counters,
}

impl NoopSnapCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobCache for NoopSnapCache {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn take<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        loader: CacheFuture<'a>,
    ) -> CacheFuture<'a> {
        Box::pin(async move {
            self.counters.miss();
            self.flights
                .run(&cache_key(namespace, key), || loader)
                .await
        })
    }

    fn prime(&self, _namespace: &str, _key: &str, _value: Bytes) {}

    fn invalidate(&self, _namespace: &str, _key: &str) {}

    fn stats(&self) -> CacheStats {
        self.counters.snapshot(0)
    }
}

/// Periodic sweep and stats logging for a set of caches. Stats are logged
/// only for intervals that saw traffic.
pub fn spawn_maintenance(
    caches: Vec<Arc<dyn BlobCache>>,
    sweep_interval: Duration,
    stats_interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweep_tick = tokio::time::interval(sweep_interval);
        let mut stats_tick = tokio::time::interval(stats_interval);
        let mut last_requests = vec![0u64; caches.len()];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sweep_tick.tick() => {
                    for cache in &caches {
                        let removed = cache.sweep();
                        if removed > 0 {
                            tracing::debug!(cache = cache.name(), removed, "Cache sweep");
                        }
                    }
                }
                _ = stats_tick.tick() => {
                    for (cache, last) in caches.iter().zip(last_requests.iter_mut()) {
                        let stats = cache.stats();
                        if stats.requests() != *last {
                            *last = stats.requests();
                            info!(
                                cache = cache.name(),
                                hits = stats.hits,
                                misses = stats.misses,
                                entries = stats.entries,
                                "Cache stats"
                            );
                        }
                    }
                }
            }
        }
    })
}
