//! Catalog-level index operations over a backend
//!
//! Decodes members into [`DeltaInfo`]/[`SnapInfo`]/[`PendingInfo`] and keeps
//! the key layout in one place. Every method is one or two backend calls.

use super::backend::{IndexBackend, ScoreBound};
use super::keys::{IndexKeys, CONFIG_KEY};
use super::member::{delta_member, snap_member, DeltaInfo, Member, PendingInfo, SnapInfo};
use crate::error::{IndexError, LakeResult};
use crate::merge::{FieldPath, MergeType};
use crate::tsseq::TsSeq;
use std::sync::Arc;
use tracing::warn;

/// Deltas above the latest snapshot, split by commit state
#[derive(Debug, Clone, Default)]
pub struct DeltaWindow {
    pub deltas: Vec<DeltaInfo>,
    pub pending: Vec<PendingInfo>,
}

/// What retention may remove
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemovalPlan {
    pub latest: Option<SnapInfo>,
    pub snaps: Vec<SnapInfo>,
    pub deltas: Vec<DeltaInfo>,
}

impl RemovalPlan {
    pub fn is_empty(&self) -> bool {
        self.snaps.is_empty() && self.deltas.is_empty()
    }
}

#[derive(Clone)]
pub struct IndexService {
    backend: Arc<dyn IndexBackend>,
    keys: IndexKeys,
}

impl std::fmt::Debug for IndexService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexService")
            .field("backend", &self.backend.name())
            .field("prefix", &self.keys.prefix())
            .finish()
    }
}

/// Decode members, skipping (and logging) anything undecodable
fn decode_all(key: &str, raw: Vec<(String, f64)>) -> Vec<Member> {
    raw.into_iter()
        .filter_map(|(m, _)| match Member::parse(&m) {
            Ok(member) => Some(member),
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping undecodable index member");
                None
            }
        })
        .collect()
}

impl IndexService {
    pub fn new(backend: Arc<dyn IndexBackend>, keys: IndexKeys) -> Self {
        IndexService { backend, keys }
    }

    pub fn backend(&self) -> &Arc<dyn IndexBackend> {
        &self.backend
    }

    pub fn keys(&self) -> &IndexKeys {
        &self.keys
    }

    pub async fn add_delta(
        &self,
        catalog: &str,
        path: &FieldPath,
        merge_type: MergeType,
        ts_seq: TsSeq,
    ) -> LakeResult<()> {
        let member = delta_member(merge_type, path, ts_seq);
        self.backend
            .zadd(&self.keys.delta_set(catalog), ts_seq.score(), &member)
            .await?;
        Ok(())
    }

    pub async fn add_snap(&self, catalog: &str, start: TsSeq, stop: TsSeq) -> LakeResult<()> {
        let member = snap_member(start, stop);
        self.backend
            .zadd(&self.keys.snap_set(catalog), stop.score(), &member)
            .await?;
        Ok(())
    }

    /// Committed deltas with `min <= score <= max`, ascending
    pub async fn read_range(
        &self,
        catalog: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> LakeResult<Vec<DeltaInfo>> {
        Ok(self
            .read_window(catalog, min, max)
            .await?
            .deltas)
    }

    /// Committed and pending deltas in a score range
    pub async fn read_window(
        &self,
        catalog: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> LakeResult<DeltaWindow> {
        let key = self.keys.delta_set(catalog);
        let raw = self.backend.zrange_by_score(&key, min, max).await?;

        let mut window = DeltaWindow::default();
        for member in decode_all(&key, raw) {
            match member {
                Member::Delta(d) => window.deltas.push(d),
                Member::Pending(p) => window.pending.push(p),
                Member::Snap(_) => {}
            }
        }
        Ok(window)
    }

    pub async fn get_latest_snap(&self, catalog: &str) -> LakeResult<Option<SnapInfo>> {
        let key = self.keys.snap_set(catalog);
        let top = self.backend.zrevrange(&key, 0, 0).await?;
        Ok(decode_all(&key, top).into_iter().find_map(|m| match m {
            Member::Snap(s) => Some(s),
            _ => None,
        }))
    }

    pub async fn has_snap(&self, catalog: &str, start: TsSeq, stop: TsSeq) -> LakeResult<bool> {
        let score = self
            .backend
            .zscore(&self.keys.snap_set(catalog), &snap_member(start, stop))
            .await?;
        Ok(score.is_some())
    }

    /// Every snapshot, oldest first
    pub async fn snaps(&self, catalog: &str) -> LakeResult<Vec<SnapInfo>> {
        let key = self.keys.snap_set(catalog);
        let raw = self
            .backend
            .zrange_by_score(&key, ScoreBound::NegInf, ScoreBound::PosInf)
            .await?;
        Ok(decode_all(&key, raw)
            .into_iter()
            .filter_map(|m| match m {
                Member::Snap(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    /// The latest snapshot is always kept, plus `keep_snaps` before it.
    /// Committed deltas at or below the latest snapshot's stop are removable.
    pub async fn read_safe_remove_range_with_retention(
        &self,
        catalog: &str,
        keep_snaps: usize,
    ) -> LakeResult<RemovalPlan> {
        let mut snaps = self.snaps(catalog).await?;
        let Some(latest) = snaps.pop() else {
            return Ok(RemovalPlan::default());
        };

        let droppable = snaps.len().saturating_sub(keep_snaps);
        snaps.truncate(droppable);

        let deltas = self
            .read_range(catalog, ScoreBound::NegInf, ScoreBound::up_to(latest.stop))
            .await?;

        Ok(RemovalPlan {
            latest: Some(latest),
            snaps,
            deltas,
        })
    }

    /// One multi-member removal against `set_key`
    pub async fn batch_remove(&self, set_key: &str, members: &[String]) -> LakeResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        Ok(self.backend.zrem(set_key, members).await?)
    }

    pub async fn delta_count(&self, catalog: &str) -> LakeResult<usize> {
        Ok(self.backend.zcard(&self.keys.delta_set(catalog)).await?)
    }

    pub async fn snap_count(&self, catalog: &str) -> LakeResult<usize> {
        Ok(self.backend.zcard(&self.keys.snap_set(catalog)).await?)
    }

    /// Newest committed TsSeq: the later of the newest committed delta and
    /// the newest snapshot stop
    pub async fn latest_committed(&self, catalog: &str) -> LakeResult<Option<TsSeq>> {
        const PAGE: isize = 16;
        let key = self.keys.delta_set(catalog);

        let mut newest_delta = None;
        let mut start = 0;
        loop {
            let page = self.backend.zrevrange(&key, start, start + PAGE - 1).await?;
            let exhausted = (page.len() as isize) < PAGE;
            newest_delta = decode_all(&key, page).into_iter().find_map(|m| match m {
                Member::Delta(d) => Some(d.ts_seq),
                _ => None,
            });
            if newest_delta.is_some() || exhausted {
                break;
            }
            start += PAGE;
        }

        let newest_snap = self.get_latest_snap(catalog).await?.map(|s| s.stop);
        Ok(newest_delta.max(newest_snap))
    }

    pub async fn pending(&self, catalog: &str) -> LakeResult<Vec<PendingInfo>> {
        Ok(self
            .read_window(catalog, ScoreBound::NegInf, ScoreBound::PosInf)
            .await?
            .pending)
    }

    pub async fn meta(&self, catalog: &str, path: &str) -> LakeResult<Option<Vec<u8>>> {
        Ok(self.backend.hget(&self.keys.meta_hash(catalog), path).await?)
    }

    pub async fn batch_meta(
        &self,
        catalog: &str,
        paths: &[String],
    ) -> LakeResult<Vec<Option<Vec<u8>>>> {
        Ok(self
            .backend
            .hmget(&self.keys.meta_hash(catalog), paths)
            .await?)
    }

    pub async fn all_meta(&self, catalog: &str) -> LakeResult<Vec<(String, Vec<u8>)>> {
        Ok(self.backend.hgetall(&self.keys.meta_hash(catalog)).await?)
    }

    pub async fn set_meta(&self, catalog: &str, path: &str, meta: &[u8]) -> Result<(), IndexError> {
        self.backend
            .hset(&self.keys.meta_hash(catalog), path, meta)
            .await
    }

    pub async fn delete_meta(&self, catalog: &str, path: &str) -> LakeResult<bool> {
        Ok(self.backend.hdel(&self.keys.meta_hash(catalog), path).await?)
    }

    pub async fn sample_score(&self, catalog: &str, indicator: &str) -> LakeResult<Option<f64>> {
        Ok(self
            .backend
            .zscore(&self.keys.sample_set(catalog), indicator)
            .await?)
    }

    pub async fn record_sample(
        &self,
        catalog: &str,
        indicator: &str,
        last_updated: TsSeq,
    ) -> LakeResult<()> {
        self.backend
            .zadd(&self.keys.sample_set(catalog), last_updated.score(), indicator)
            .await?;
        Ok(())
    }

    pub async fn get_config_raw(&self) -> LakeResult<Option<Vec<u8>>> {
        Ok(self.backend.get(CONFIG_KEY).await?)
    }

    pub async fn set_config_raw(&self, doc: &[u8]) -> LakeResult<()> {
        Ok(self.backend.set(CONFIG_KEY, doc).await?)
    }
}
