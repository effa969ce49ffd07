//! Pending-entry janitor
//!
//! A writer whose blob put fails (or that dies between allocate and commit)
//! leaves a `pending|…` member behind, which blocks reads of its catalog.
//! Readers note such catalogs in a [`PendingRegistry`]; the janitor sweeps
//! them and removes pending members older than `pending_ttl`.

use crate::blob::Storage;
use crate::clock::Clock;
use crate::error::LakeResult;
use crate::index::IndexService;
use ahash::AHashSet;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Catalogs where a list observed pending members
#[derive(Debug, Clone, Default)]
pub struct PendingRegistry {
    catalogs: Arc<Mutex<AHashSet<String>>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&self, catalog: &str) {
        self.catalogs.lock().insert(catalog.to_string());
    }

    pub fn drain(&self) -> Vec<String> {
        let mut catalogs: Vec<String> = self.catalogs.lock().drain().collect();
        catalogs.sort();
        catalogs
    }

    pub fn len(&self) -> usize {
        self.catalogs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.lock().is_empty()
    }
}

/// Outcome of sweeping one catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub removed: usize,
    pub remaining: usize,
}

pub struct Janitor {
    storage: Storage,
    index: IndexService,
    clock: Arc<dyn Clock>,
    pending_ttl: Duration,
    registry: PendingRegistry,
}

impl Janitor {
    pub fn new(
        storage: Storage,
        index: IndexService,
        clock: Arc<dyn Clock>,
        pending_ttl: Duration,
        registry: PendingRegistry,
    ) -> Self {
        Janitor {
            storage,
            index,
            clock,
            pending_ttl,
            registry,
        }
    }

    pub fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    /// Remove pending members of `catalog` allocated more than `pending_ttl` ago
    pub async fn sweep(&self, catalog: &str) -> LakeResult<SweepStats> {
        let pending = self.index.pending(catalog).await?;
        if pending.is_empty() {
            return Ok(SweepStats::default());
        }

        let cutoff = self.clock.now().as_secs() - self.pending_ttl.as_secs() as i64;
        let (stale, fresh): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|p| p.ts_seq.timestamp() < cutoff);

        for p in &stale {
            // A body may have landed before the commit failed
            let key = self.storage.make_delta_key(catalog, p.ts_seq, p.merge_type);
            if let Err(e) = self.storage.delete(&key).await {
                debug!(catalog = %catalog, key = %key, error = %e, "Orphan body not deleted");
            }
        }

        let members: Vec<String> = stale.iter().map(|p| p.member.clone()).collect();
        let removed = self
            .index
            .batch_remove(&self.index.keys().delta_set(catalog), &members)
            .await?;

        if removed > 0 {
            info!(
                catalog = %catalog,
                removed,
                remaining = fresh.len(),
                "Removed stale pending entries"
            );
        }
        Ok(SweepStats {
            removed,
            remaining: fresh.len(),
        })
    }

    /// Sweep every noted catalog once. Catalogs that still hold pending
    /// members are noted again for the next pass.
    pub async fn sweep_noted(&self) -> usize {
        let mut removed = 0;
        for catalog in self.registry.drain() {
            match self.sweep(&catalog).await {
                Ok(stats) => {
                    removed += stats.removed;
                    if stats.remaining > 0 {
                        self.registry.note(&catalog);
                    }
                }
                Err(e) => {
                    warn!(catalog = %catalog, error = %e, "Pending sweep failed");
                    self.registry.note(&catalog);
                }
            }
        }
        removed
    }

    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            // The first tick completes immediately
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        self.sweep_noted().await;
                    }
                }
            }
            debug!("Pending janitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::blob::InMemoryBlobBackend;
    use crate::clock::SimulatedClock;
    use crate::index::{IndexKeys, MemoryIndex};
    use crate::merge::{FieldPath, MergeType};

    const T0: u64 = 1_700_000_000;

    struct Fixture {
        janitor: Janitor,
        allocator: Allocator,
        index: IndexService,
        clock: SimulatedClock,
    }

    fn fixture() -> Fixture {
        let clock = SimulatedClock::at_secs(T0);
        let memory = MemoryIndex::with_clock(Arc::new(clock.clone()));
        let index = IndexService::new(Arc::new(memory), IndexKeys::new("memory", "t"));
        let storage = Storage::new(Arc::new(InMemoryBlobBackend::new()), "", "memory:t");
        let janitor = Janitor::new(
            storage,
            index.clone(),
            Arc::new(clock.clone()),
            Duration::from_secs(60),
            PendingRegistry::new(),
        );
        Fixture {
            janitor,
            allocator: Allocator::new(index.clone()),
            index,
            clock,
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_entries() {
        let f = fixture();
        f.allocator
            .allocate("c", &FieldPath::root(), MergeType::Replace)
            .await
            .unwrap();
        f.clock.advance_ms(61_000);
        f.allocator
            .allocate("c", &FieldPath::root(), MergeType::Replace)
            .await
            .unwrap();
        f.clock.advance_ms(1_000);

        let stats = f.janitor.sweep("c").await.unwrap();
        assert_eq!(stats, SweepStats { removed: 1, remaining: 1 });
        assert_eq!(f.index.pending("c").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_committed_deltas_untouched() {
        let f = fixture();
        let alloc = f
            .allocator
            .allocate("c", &FieldPath::root(), MergeType::Replace)
            .await
            .unwrap();
        f.allocator.commit(&alloc).await.unwrap();
        f.clock.advance_ms(120_000);

        assert_eq!(f.janitor.sweep("c").await.unwrap(), SweepStats::default());
        assert_eq!(f.index.delta_count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_noted_requeues_fresh_catalogs() {
        let f = fixture();
        f.allocator
            .allocate("fresh", &FieldPath::root(), MergeType::Replace)
            .await
            .unwrap();
        f.janitor.registry().note("fresh");
        f.janitor.registry().note("empty");

        assert_eq!(f.janitor.sweep_noted().await, 0);
        assert_eq!(f.janitor.registry().drain(), vec!["fresh".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_stops_on_shutdown() {
        let f = fixture();
        let janitor = Arc::new(f.janitor);
        let shutdown = CancellationToken::new();
        let handle = janitor.clone().spawn(Duration::from_secs(30), shutdown.clone());

        f.allocator
            .allocate("c", &FieldPath::root(), MergeType::Replace)
            .await
            .unwrap();
        janitor.registry().note("c");
        f.clock.advance_ms(61_000);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(f.index.pending("c").await.unwrap().is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
