//! Snapshot emission
//!
//! A snapshot is the merged document covering `(start, stop]`. Saving puts
//! the blob first and then indexes it; a failed index insert leaves one
//! orphaned blob and nothing else.
//!
//! Snapshots form a chain: each `start` is the previous `stop`. A range
//! that no longer extends the latest snapshot is dropped without a put.

use crate::blob::Storage;
use crate::cache::BlobCache;
use crate::error::LakeResult;
use crate::index::IndexService;
use crate::singleflight::SingleFlight;
use crate::tsseq::TsSeq;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

pub struct SnapshotManager {
    storage: Storage,
    index: IndexService,
    snap_cache: Arc<dyn BlobCache>,
    flights: SingleFlight<LakeResult<Option<String>>>,
}

impl SnapshotManager {
    pub fn new(storage: Storage, index: IndexService, snap_cache: Arc<dyn BlobCache>) -> Self {
        SnapshotManager {
            storage,
            index,
            snap_cache,
            flights: SingleFlight::new(),
        }
    }

    /// Store `merged` as the snapshot `(start, stop]` and return its blob key,
    /// or `None` when the range no longer extends the latest snapshot.
    ///
    /// Concurrent saves of the same range collapse into one put and one
    /// index insert; every caller gets the same result. A range that is
    /// already indexed is not written again.
    pub async fn save(
        &self,
        catalog: &str,
        start: TsSeq,
        stop: TsSeq,
        merged: Bytes,
    ) -> LakeResult<Option<String>> {
        let flight_key = format!("{}_{}_{}", catalog, start, stop);
        self.flights
            .run(&flight_key, || self.save_once(catalog, start, stop, merged))
            .await
    }

    /// True when `(start, stop]` links onto the latest indexed snapshot
    async fn extends_chain(&self, catalog: &str, start: TsSeq, stop: TsSeq) -> LakeResult<bool> {
        Ok(match self.index.get_latest_snap(catalog).await? {
            Some(latest) => latest.stop == start && latest.stop < stop,
            None => true,
        })
    }

    async fn save_once(
        &self,
        catalog: &str,
        start: TsSeq,
        stop: TsSeq,
        merged: Bytes,
    ) -> LakeResult<Option<String>> {
        let key = self.storage.make_snap_key(catalog, start, stop);
        if self.index.has_snap(catalog, start, stop).await? {
            debug!(catalog = %catalog, key = %key, "Snapshot already indexed");
            return Ok(Some(key));
        }
        if !self.extends_chain(catalog, start, stop).await? {
            debug!(catalog = %catalog, key = %key, "Snapshot superseded, not saved");
            return Ok(None);
        }

        self.storage.put(&key, &merged).await?;
        // Another range may have been indexed while the put ran
        if !self.extends_chain(catalog, start, stop).await? {
            if let Err(e) = self.storage.delete(&key).await {
                debug!(catalog = %catalog, key = %key, error = %e, "Superseded snapshot not deleted");
            }
            return Ok(None);
        }
        self.index.add_snap(catalog, start, stop).await?;
        self.snap_cache
            .prime(self.storage.namespace(), &key, merged);

        debug!(catalog = %catalog, start = %start, stop = %stop, key = %key, "Snapshot saved");
        Ok(Some(key))
    }
}
