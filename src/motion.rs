//! Motion sampling
//!
//! An indicator of catalog `cat` is derived from a set of "motion" catalogs.
//! The newest committed TsSeq across them is the motion; the indicator's
//! score in `{prefix}:sample:{encCat}` records the motion it was last
//! computed for. A sample runs the callback only when the motion moved past
//! that score.

use crate::error::LakeResult;
use crate::index::IndexService;
use crate::singleflight::SingleFlight;
use crate::tsseq::TsSeq;
use futures::{StreamExt, TryStreamExt};
use std::future::Future;
use tracing::debug;

pub struct MotionSampler {
    index: IndexService,
    fetch_concurrency: usize,
    flights: SingleFlight<LakeResult<bool>>,
}

impl MotionSampler {
    pub fn new(index: IndexService, fetch_concurrency: usize) -> Self {
        MotionSampler {
            index,
            fetch_concurrency: fetch_concurrency.max(1),
            flights: SingleFlight::new(),
        }
    }

    /// Newest committed TsSeq across `catalogs`
    pub async fn last_updated(&self, catalogs: &[String]) -> LakeResult<Option<TsSeq>> {
        let latest: Vec<Option<TsSeq>> = futures::stream::iter(catalogs)
            .map(|catalog| self.index.latest_committed(catalog))
            .buffer_unordered(self.fetch_concurrency)
            .try_collect()
            .await?;
        Ok(latest.into_iter().flatten().max())
    }

    /// Run `callback(last_updated)` if the motion catalogs changed since the
    /// indicator was last sampled. Returns whether the callback ran.
    pub async fn sample<F, Fut>(
        &self,
        catalog: &str,
        indicator: &str,
        motion_catalogs: &[String],
        callback: F,
    ) -> LakeResult<bool>
    where
        F: FnOnce(TsSeq) -> Fut,
        Fut: Future<Output = LakeResult<()>>,
    {
        let Some(last_updated) = self.last_updated(motion_catalogs).await? else {
            return Ok(false);
        };
        if !self.is_stale(catalog, indicator, last_updated).await? {
            return Ok(false);
        }

        let flight_key = format!("{}_{}_{}", catalog, indicator, last_updated);
        self.flights
            .run(&flight_key, || {
                self.sample_once(catalog, indicator, last_updated, callback)
            })
            .await
    }

    async fn sample_once<F, Fut>(
        &self,
        catalog: &str,
        indicator: &str,
        last_updated: TsSeq,
        callback: F,
    ) -> LakeResult<bool>
    where
        F: FnOnce(TsSeq) -> Fut,
        Fut: Future<Output = LakeResult<()>>,
    {
        // A flight that finished just before this one already recorded it
        if !self.is_stale(catalog, indicator, last_updated).await? {
            return Ok(false);
        }
        callback(last_updated).await?;
        self.index
            .record_sample(catalog, indicator, last_updated)
            .await?;
        debug!(
            catalog = %catalog,
            indicator = %indicator,
            last_updated = %last_updated,
            "Motion sample recorded"
        );
        Ok(true)
    }

    async fn is_stale(&self, catalog: &str, indicator: &str, last_updated: TsSeq) -> LakeResult<bool> {
        let recorded = self.index.sample_score(catalog, indicator).await?;
        Ok(recorded.map_or(true, |score| score < last_updated.score()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LakeError;
    use crate::index::{IndexKeys, MemoryIndex};
    use crate::merge::{FieldPath, MergeType};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ts(t: i64, s: i64) -> TsSeq {
        TsSeq::new(t, s).unwrap()
    }

    fn sampler() -> (MotionSampler, IndexService) {
        let index = IndexService::new(Arc::new(MemoryIndex::new()), IndexKeys::new("memory", "t"));
        (MotionSampler::new(index.clone(), 10), index)
    }

    async fn commit(index: &IndexService, catalog: &str, at: TsSeq) {
        index
            .add_delta(catalog, &FieldPath::root(), MergeType::Replace, at)
            .await
            .unwrap();
    }

    fn motions() -> Vec<String> {
        vec!["m1".to_string(), "m2".to_string()]
    }

    #[tokio::test]
    async fn test_runs_once_per_motion() {
        let (sampler, index) = sampler();
        commit(&index, "m1", ts(100, 1)).await;
        commit(&index, "m2", ts(105, 2)).await;

        let seen = Mutex::new(Vec::new());
        let ran = sampler
            .sample("c", "count", &motions(), |last| {
                seen.lock().push(last);
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert!(ran);
        assert_eq!(*seen.lock(), vec![ts(105, 2)]);

        let ran = sampler
            .sample("c", "count", &motions(), |_| async { Ok(()) })
            .await
            .unwrap();
        assert!(!ran);

        commit(&index, "m1", ts(110, 1)).await;
        let ran = sampler
            .sample("c", "count", &motions(), |last| {
                seen.lock().push(last);
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert!(ran);
        assert_eq!(seen.lock().last(), Some(&ts(110, 1)));
    }

    #[tokio::test]
    async fn test_snapshot_stop_counts_as_motion() {
        let (sampler, index) = sampler();
        index.add_snap("m1", TsSeq::ZERO, ts(200, 4)).await.unwrap();
        assert_eq!(sampler.last_updated(&motions()).await.unwrap(), Some(ts(200, 4)));
    }

    #[tokio::test]
    async fn test_no_motion_skips_callback() {
        let (sampler, _) = sampler();
        let ran = sampler
            .sample("c", "count", &motions(), |_| async {
                Err(LakeError::Internal("must not run".into()))
            })
            .await
            .unwrap();
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_callback_error_records_nothing() {
        let (sampler, index) = sampler();
        commit(&index, "m1", ts(100, 1)).await;

        let err = sampler
            .sample("c", "count", &motions(), |_| async {
                Err(LakeError::Internal("boom".into()))
            })
            .await;
        assert!(err.is_err());
        assert_eq!(index.sample_score("c", "count").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_samples_share_one_callback() {
        let (sampler, index) = sampler();
        commit(&index, "m1", ts(100, 1)).await;
        let runs = AtomicUsize::new(0);
        let motions = motions();

        let results = futures::future::join_all((0..5).map(|_| {
            sampler.sample("c", "count", &motions, |_| async {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            })
        }))
        .await;

        assert!(results.iter().all(|r| matches!(r, Ok(true))));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
