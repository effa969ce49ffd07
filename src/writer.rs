//! Delta writes
//!
//! ```text
//! validate ──► allocate (pending member) ──► put body ──► commit
//! ```
//!
//! A failed put leaves the pending member in place. It only blocks reads
//! of the catalog until the janitor removes it. A commit that finds its
//! pending member already swept fails and deletes the body it stored.

use crate::allocator::Allocator;
use crate::blob::Storage;
use crate::error::{IndexError, LakeError, LakeResult};
use crate::merge::{FieldPath, MergeType};
use crate::tsseq::TsSeq;
use bytes::Bytes;
use serde::de::IgnoredAny;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub catalog: String,
    pub path: String,
    pub merge_type: MergeType,
    pub body: Bytes,
}

impl WriteRequest {
    pub fn new(
        catalog: impl Into<String>,
        path: impl Into<String>,
        merge_type: MergeType,
        body: impl Into<Bytes>,
    ) -> Self {
        WriteRequest {
            catalog: catalog.into(),
            path: path.into(),
            merge_type,
            body: body.into(),
        }
    }

    /// Build from a numeric merge type (1 = replace, 2 = RFC-7396, 3 = RFC-6902)
    pub fn with_code(
        catalog: impl Into<String>,
        path: impl Into<String>,
        merge_code: i64,
        body: impl Into<Bytes>,
    ) -> LakeResult<Self> {
        Ok(Self::new(catalog, path, MergeType::from_code(merge_code)?, body))
    }
}

pub(crate) fn validate_catalog(catalog: &str) -> LakeResult<()> {
    if catalog.is_empty() {
        return Err(LakeError::InvalidInput("catalog name is empty".into()));
    }
    Ok(())
}

/// Reject bodies the merge engine could never apply
fn validate_body(merge_type: MergeType, body: &[u8]) -> LakeResult<()> {
    if body.is_empty() {
        return Err(LakeError::InvalidInput("delta body is empty".into()));
    }
    let parsed = match merge_type {
        MergeType::Rfc6902 => serde_json::from_slice::<::json_patch::Patch>(body).map(|_| ()),
        MergeType::Replace | MergeType::Rfc7396 => {
            serde_json::from_slice::<IgnoredAny>(body).map(|_| ())
        }
    };
    parsed.map_err(|e| {
        LakeError::InvalidInput(format!("body is not a valid {} delta: {}", merge_type, e))
    })
}

#[derive(Debug, Clone)]
pub struct Writer {
    storage: Storage,
    allocator: Allocator,
}

impl Writer {
    pub fn new(storage: Storage, allocator: Allocator) -> Self {
        Writer { storage, allocator }
    }

    /// Append one delta; returns its TsSeq
    pub async fn write(&self, req: &WriteRequest) -> LakeResult<TsSeq> {
        validate_catalog(&req.catalog)?;
        let path = FieldPath::parse(&req.path)?;
        validate_body(req.merge_type, &req.body)?;

        let alloc = self
            .allocator
            .allocate(&req.catalog, &path, req.merge_type)
            .await?;
        let key = self
            .storage
            .make_delta_key(&req.catalog, alloc.ts_seq, req.merge_type);

        if let Err(e) = self.storage.put(&key, &req.body).await {
            warn!(
                catalog = %req.catalog,
                ts_seq = %alloc.ts_seq,
                key = %key,
                error = %e,
                "Delta body not stored, pending entry left behind"
            );
            return Err(e);
        }

        if let Err(e) = self.allocator.commit(&alloc).await {
            // A swept pending entry means nothing will ever index this body
            if matches!(e, LakeError::IndexCommitFailed(IndexError::PendingMissing { .. })) {
                if let Err(del) = self.storage.delete(&key).await {
                    debug!(key = %key, error = %del, "Unindexed delta body not deleted");
                }
            }
            warn!(
                catalog = %req.catalog,
                ts_seq = %alloc.ts_seq,
                error = %e,
                "Delta commit failed"
            );
            return Err(e);
        }
        debug!(catalog = %req.catalog, path = %path, ts_seq = %alloc.ts_seq, "Delta committed");
        Ok(alloc.ts_seq)
    }
}
