//! Read orchestration
//!
//! ```text
//! list:   latest snap ──► deltas with score > snap.stop ──► ListResult
//!                                  (pending members ⇒ has_pending)
//! read:   ┌─ base:   SnapCache(snap blob) or {}
//!         └─ bodies: DeltaCache × fetch_concurrency, in score order
//!         ──► replay ──► bytes ──► (detached) SnapshotManager::save
//! ```

use crate::blob::Storage;
use crate::cache::BlobCache;
use crate::error::{LakeError, LakeResult};
use crate::index::{DeltaInfo, IndexService, PendingInfo, ScoreBound, SnapInfo};
use crate::janitor::PendingRegistry;
use crate::merge::{replay, PatchRef, UpdatedAt};
use crate::snapshot::SnapshotManager;
use crate::tsseq::TsSeq;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub catalog: String,
    /// Emit a snapshot covering the deltas this read applies
    pub generate_snap: bool,
}

impl ReadRequest {
    pub fn new(catalog: impl Into<String>) -> Self {
        ReadRequest {
            catalog: catalog.into(),
            generate_snap: true,
        }
    }

    pub fn generate_snap(mut self, generate: bool) -> Self {
        self.generate_snap = generate;
        self
    }
}

/// What a read of a catalog would apply
#[derive(Debug, Clone)]
pub struct ListResult {
    pub catalog: String,
    pub snap: Option<SnapInfo>,
    pub deltas: Vec<DeltaInfo>,
    pub pending: Vec<PendingInfo>,
    pub has_pending: bool,
    /// Range a snapshot taken after this read would cover
    pub next_snap: Option<SnapInfo>,
    pub generate_snap: bool,
}

impl ListResult {
    /// The non-fatal list error: uncommitted writes inside the window
    pub fn err(&self) -> Option<LakeError> {
        self.has_pending.then(|| LakeError::PendingWrites {
            catalog: self.catalog.clone(),
            pending: self.pending.len(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.snap.is_none() && self.deltas.is_empty()
    }
}

/// Materialized catalog value
#[derive(Debug, Clone)]
pub struct ReadResult {
    bytes: Bytes,
    base: Option<SnapInfo>,
    applied: usize,
    updated_at: UpdatedAt,
    scheduled_snap: Option<SnapInfo>,
}

impl ReadResult {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn as_str(&self) -> LakeResult<&str> {
        std::str::from_utf8(&self.bytes)
            .map_err(|e| LakeError::Internal(format!("merged value is not UTF-8: {}", e)))
    }

    pub fn to_map(&self) -> LakeResult<Map<String, Value>> {
        self.decode()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> LakeResult<T> {
        serde_json::from_slice(&self.bytes)
            .map_err(|e| LakeError::InvalidInput(format!("cannot decode merged value: {}", e)))
    }

    /// Snapshot the read started from
    pub fn base(&self) -> Option<SnapInfo> {
        self.base
    }

    /// Deltas applied on top of the base
    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn updated_at(&self) -> &UpdatedAt {
        &self.updated_at
    }

    /// Range handed to the snapshot manager, if any
    pub fn scheduled_snap(&self) -> Option<SnapInfo> {
        self.scheduled_snap
    }
}

pub struct Reader {
    storage: Storage,
    index: IndexService,
    delta_cache: Arc<dyn BlobCache>,
    snap_cache: Arc<dyn BlobCache>,
    snapshots: Arc<SnapshotManager>,
    pending: PendingRegistry,
    fetch_concurrency: usize,
}

impl Reader {
    pub fn new(
        storage: Storage,
        index: IndexService,
        delta_cache: Arc<dyn BlobCache>,
        snap_cache: Arc<dyn BlobCache>,
        snapshots: Arc<SnapshotManager>,
        pending: PendingRegistry,
        fetch_concurrency: usize,
    ) -> Self {
        Reader {
            storage,
            index,
            delta_cache,
            snap_cache,
            snapshots,
            pending,
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    pub async fn list(&self, req: &ReadRequest) -> LakeResult<ListResult> {
        let catalog = req.catalog.as_str();
        let snap = self.index.get_latest_snap(catalog).await?;
        let min = snap.map_or(ScoreBound::NegInf, |s| ScoreBound::after(s.stop));
        let window = self.index.read_window(catalog, min, ScoreBound::PosInf).await?;

        let has_pending = !window.pending.is_empty();
        if has_pending {
            debug!(catalog = %catalog, pending = window.pending.len(), "Pending writes in read window");
            self.pending.note(catalog);
        }

        let next_snap = window.deltas.last().map(|last| SnapInfo {
            start: snap.map_or(TsSeq::ZERO, |s| s.stop),
            stop: last.ts_seq,
        });

        Ok(ListResult {
            catalog: req.catalog.clone(),
            snap,
            deltas: window.deltas,
            pending: window.pending,
            has_pending,
            next_snap,
            generate_snap: req.generate_snap,
        })
    }

    pub async fn read(&self, list: &ListResult) -> LakeResult<ReadResult> {
        if let Some(err) = list.err() {
            return Err(err);
        }

        let bodies = futures::stream::iter(list.deltas.iter())
            .map(|delta| self.delta_body(&list.catalog, delta))
            .buffered(self.fetch_concurrency)
            .try_collect::<Vec<Bytes>>();
        let (base, bodies) = tokio::try_join!(self.base(list), bodies)?;

        let patches = list
            .deltas
            .iter()
            .zip(bodies.iter())
            .map(|(delta, body)| PatchRef {
                path: &delta.path,
                merge_type: delta.merge_type,
                ts_seq: delta.ts_seq,
                body,
            });
        let replayed = replay(&base, patches)?;

        let bytes = if replayed.applied == 0 {
            base
        } else {
            serde_json::to_vec(&replayed.doc)
                .map(Bytes::from)
                .map_err(|e| LakeError::Internal(format!("cannot encode merged value: {}", e)))?
        };

        let scheduled_snap = list.next_snap.filter(|_| list.generate_snap);
        if let Some(range) = scheduled_snap {
            self.spawn_snapshot(list.catalog.clone(), range, bytes.clone());
        }

        Ok(ReadResult {
            bytes,
            base: list.snap,
            applied: replayed.applied,
            updated_at: replayed.updated_at,
            scheduled_snap,
        })
    }

    async fn base(&self, list: &ListResult) -> LakeResult<Bytes> {
        let Some(snap) = list.snap else {
            return Ok(Bytes::from_static(b"{}"));
        };
        let key = self.storage.make_snap_key(&list.catalog, snap.start, snap.stop);
        self.snap_cache
            .take(self.storage.namespace(), &key, Box::pin(self.storage.get(&key)))
            .await
    }

    async fn delta_body(&self, catalog: &str, delta: &DeltaInfo) -> LakeResult<Bytes> {
        if let Some(body) = &delta.body {
            return Ok(body.clone());
        }
        let key = self
            .storage
            .make_delta_key(catalog, delta.ts_seq, delta.merge_type);
        self.delta_cache
            .take(self.storage.namespace(), &key, Box::pin(self.storage.get_delta(&key)))
            .await
    }

    /// Detached from the caller: the save finishes even if the read's
    /// future is dropped.
    fn spawn_snapshot(&self, catalog: String, range: SnapInfo, merged: Bytes) {
        let snapshots = self.snapshots.clone();
        tokio::spawn(async move {
            if let Err(e) = snapshots
                .save(&catalog, range.start, range.stop, merged)
                .await
            {
                warn!(catalog = %catalog, range = %range, error = %e, "Snapshot emission failed");
            }
        });
    }
}
