//! History retention
//!
//! Keeps the latest snapshot plus `keep_snaps` before it and drops every
//! committed delta the latest snapshot already covers. Blobs go first, then
//! index members, so an interrupted pass never leaves members pointing at
//! deleted blobs.

use crate::blob::Storage;
use crate::cache::BlobCache;
use crate::error::{LakeError, LakeResult};
use crate::index::{IndexService, SnapInfo};
use crate::singleflight::SingleFlight;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionStats {
    pub deltas_removed: usize,
    pub snaps_removed: usize,
    /// Snapshot every later read starts from
    pub kept: Option<SnapInfo>,
}

pub struct Retentioner {
    storage: Storage,
    index: IndexService,
    delta_cache: Arc<dyn BlobCache>,
    snap_cache: Arc<dyn BlobCache>,
    delete_concurrency: usize,
    flights: SingleFlight<LakeResult<RetentionStats>>,
}

impl Retentioner {
    pub fn new(
        storage: Storage,
        index: IndexService,
        delta_cache: Arc<dyn BlobCache>,
        snap_cache: Arc<dyn BlobCache>,
        delete_concurrency: usize,
    ) -> Self {
        Retentioner {
            storage,
            index,
            delta_cache,
            snap_cache,
            delete_concurrency: delete_concurrency.max(1),
            flights: SingleFlight::new(),
        }
    }

    /// Concurrent calls for the same `(catalog, keep_snaps)` share one pass
    pub async fn clear_history_with_retention(
        &self,
        catalog: &str,
        keep_snaps: usize,
    ) -> LakeResult<RetentionStats> {
        let flight_key = format!("{}_{}", catalog, keep_snaps);
        self.flights
            .run(&flight_key, || self.run(catalog, keep_snaps))
            .await
    }

    async fn run(&self, catalog: &str, keep_snaps: usize) -> LakeResult<RetentionStats> {
        let plan = self
            .index
            .read_safe_remove_range_with_retention(catalog, keep_snaps)
            .await?;
        if plan.is_empty() {
            debug!(catalog = %catalog, "Nothing to remove");
            return Ok(RetentionStats {
                kept: plan.latest,
                ..RetentionStats::default()
            });
        }

        let delta_keys: Vec<String> = plan
            .deltas
            .iter()
            .map(|d| self.storage.make_delta_key(catalog, d.ts_seq, d.merge_type))
            .collect();
        let delta_members: Vec<String> = plan.deltas.iter().map(|d| d.member()).collect();
        let mut failures = self.delete_blobs(&delta_keys).await;
        let deltas_removed = self
            .index
            .batch_remove(&self.index.keys().delta_set(catalog), &delta_members)
            .await?;
        self.invalidate(self.delta_cache.as_ref(), &delta_keys);

        let snap_keys: Vec<String> = plan
            .snaps
            .iter()
            .map(|s| self.storage.make_snap_key(catalog, s.start, s.stop))
            .collect();
        let snap_members: Vec<String> = plan.snaps.iter().map(|s| s.member()).collect();
        failures.extend(self.delete_blobs(&snap_keys).await);
        let snaps_removed = self
            .index
            .batch_remove(&self.index.keys().snap_set(catalog), &snap_members)
            .await?;
        self.invalidate(self.snap_cache.as_ref(), &snap_keys);

        info!(
            catalog = %catalog,
            keep_snaps,
            deltas_removed,
            snaps_removed,
            blob_failures = failures.len(),
            "Retention pass complete"
        );

        if let Some(first) = failures.first() {
            return Err(LakeError::PartialDeleteFailure {
                failed: failures.len(),
                first: first.to_string(),
            });
        }
        Ok(RetentionStats {
            deltas_removed,
            snaps_removed,
            kept: plan.latest,
        })
    }

    /// Delete every key; failures are collected, never short-circuit
    async fn delete_blobs(&self, keys: &[String]) -> Vec<LakeError> {
        futures::stream::iter(keys)
            .map(|key| self.storage.delete(key))
            .buffer_unordered(self.delete_concurrency)
            .filter_map(|res| async move {
                match res {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(error = %e, "Blob delete failed");
                        Some(e)
                    }
                }
            })
            .collect()
            .await
    }

    fn invalidate(&self, cache: &dyn BlobCache, keys: &[String]) {
        for key in keys {
            cache.invalidate(self.storage.namespace(), key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{InMemoryBlobBackend, SimulatedBlobBackend, SimulatedBlobConfig};
    use crate::cache::NoopSnapCache;
    use crate::error::ErrorKind;
    use crate::index::{IndexKeys, MemoryIndex};
    use crate::merge::{FieldPath, MergeType};
    use crate::tsseq::TsSeq;

    fn ts(t: i64, s: i64) -> TsSeq {
        TsSeq::new(t, s).unwrap()
    }

    struct Fixture {
        retention: Retentioner,
        storage: Storage,
        index: IndexService,
        backend: SimulatedBlobBackend<InMemoryBlobBackend>,
    }

    fn fixture() -> Fixture {
        let backend = SimulatedBlobBackend::new(
            InMemoryBlobBackend::new(),
            11,
            SimulatedBlobConfig::no_faults(),
        );
        let storage = Storage::new(Arc::new(backend.clone()), "", "memory:t");
        let index = IndexService::new(Arc::new(MemoryIndex::new()), IndexKeys::new("memory", "t"));
        let retention = Retentioner::new(
            storage.clone(),
            index.clone(),
            Arc::new(NoopSnapCache::new()),
            Arc::new(NoopSnapCache::new()),
            10,
        );
        Fixture {
            retention,
            storage,
            index,
            backend,
        }
    }

    /// Deltas at (100, 1..=n), snapshots at the given stops
    async fn seed(f: &Fixture, n: i64, snap_stops: &[i64]) {
        let path = FieldPath::parse("/a").unwrap();
        for s in 1..=n {
            let key = f.storage.make_delta_key("c", ts(100, s), MergeType::Replace);
            f.storage.put(&key, s.to_string().as_bytes()).await.unwrap();
            f.index
                .add_delta("c", &path, MergeType::Replace, ts(100, s))
                .await
                .unwrap();
        }
        let mut start = TsSeq::ZERO;
        for &stop in snap_stops {
            let key = f.storage.make_snap_key("c", start, ts(100, stop));
            f.storage.put(&key, b"{}").await.unwrap();
            f.index.add_snap("c", start, ts(100, stop)).await.unwrap();
            start = ts(100, stop);
        }
    }

    #[tokio::test]
    async fn test_keeps_latest_snapshot_only() {
        let f = fixture();
        seed(&f, 5, &[3, 5]).await;

        let stats = f.retention.clear_history_with_retention("c", 0).await.unwrap();
        assert_eq!(stats.deltas_removed, 5);
        assert_eq!(stats.snaps_removed, 1);
        assert_eq!(stats.kept.map(|s| s.stop), Some(ts(100, 5)));

        assert_eq!(f.index.delta_count("c").await.unwrap(), 0);
        assert_eq!(f.index.snap_count("c").await.unwrap(), 1);
        let remaining = f.backend.inner().keys();
        assert_eq!(remaining, vec![f.storage.make_snap_key("c", ts(100, 3), ts(100, 5))]);
    }

    #[tokio::test]
    async fn test_keep_snaps_and_uncovered_deltas() {
        let f = fixture();
        seed(&f, 6, &[2, 4]).await;

        let stats = f.retention.clear_history_with_retention("c", 1).await.unwrap();
        assert_eq!(stats.snaps_removed, 0);
        assert_eq!(stats.deltas_removed, 4);
        // Deltas past the latest snapshot stay
        assert_eq!(f.index.delta_count("c").await.unwrap(), 2);
        assert_eq!(f.index.snap_count("c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_no_snapshot_means_no_removal() {
        let f = fixture();
        seed(&f, 3, &[]).await;
        let stats = f.retention.clear_history_with_retention("c", 0).await.unwrap();
        assert_eq!(stats, RetentionStats::default());
        assert_eq!(f.index.delta_count("c").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_partial_delete_failure_still_clears_index() {
        let f = fixture();
        seed(&f, 4, &[4]).await;
        f.backend.set_config(SimulatedBlobConfig {
            delete_fail_prob: 1.0,
            ..SimulatedBlobConfig::no_faults()
        });

        let err = f
            .retention
            .clear_history_with_retention("c", 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialDeleteFailure);
        assert!(matches!(err, LakeError::PartialDeleteFailure { failed: 4, .. }));
        assert_eq!(f.index.delta_count("c").await.unwrap(), 0);

        // Retrying is safe and finds nothing left to do
        f.backend.set_config(SimulatedBlobConfig::no_faults());
        let stats = f.retention.clear_history_with_retention("c", 0).await.unwrap();
        assert_eq!((stats.deltas_removed, stats.snaps_removed), (0, 0));
    }
}
