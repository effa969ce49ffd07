//! TsSeq allocation with pending pre-commit
//!
//! ```text
//! allocate:  server clock → ts, INCR lake:seqid:{encCat}:{ts} → seq
//!            ZADD delta-set ts.seq "pending|delta|{encPath}|{ts}_{seq}|{mt}"
//! commit:    ZREM pending; ZADD "delta|{mt}|{encPath}|{ts}_{seq}"   (one atomic step)
//! ```
//!
//! Both steps run server-side, so concurrent writers to one catalog always
//! receive distinct, increasing TsSeqs. A delta whose blob never lands stays
//! pending and blocks snapshots past it until the janitor removes it.

use crate::encoding::{encode_component, encode_path};
use crate::error::{IndexError, LakeError, LakeResult};
use crate::index::member::{delta_member, pending_member};
use crate::index::IndexService;
use crate::merge::{FieldPath, MergeType};
use crate::tsseq::TsSeq;
use tracing::debug;

/// A reserved slot in a catalog's delta log
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub catalog: String,
    pub path: FieldPath,
    pub merge_type: MergeType,
    pub ts_seq: TsSeq,
    pub pending_member: String,
}

impl Allocation {
    pub fn committed_member(&self) -> String {
        delta_member(self.merge_type, &self.path, self.ts_seq)
    }
}

#[derive(Debug, Clone)]
pub struct Allocator {
    index: IndexService,
}

impl Allocator {
    pub fn new(index: IndexService) -> Self {
        Allocator { index }
    }

    pub async fn allocate(
        &self,
        catalog: &str,
        path: &FieldPath,
        merge_type: MergeType,
    ) -> LakeResult<Allocation> {
        let enc_path = encode_path(path.as_str());
        let delta_set = self.index.keys().delta_set(catalog);

        let seq = self
            .index
            .backend()
            .allocate(
                &delta_set,
                &encode_component(catalog),
                &enc_path,
                merge_type.code(),
            )
            .await
            .map_err(|e| match e {
                IndexError::SeqOverflow { ts } => LakeError::SeqOverflow {
                    catalog: catalog.to_string(),
                    ts,
                },
                other => LakeError::Index(other),
            })?;

        let ts_seq = TsSeq::new(seq.ts, seq.seq).map_err(|_| {
            LakeError::Index(IndexError::Protocol(format!(
                "allocator returned {}_{}",
                seq.ts, seq.seq
            )))
        })?;
        debug!(catalog = %catalog, ts_seq = %ts_seq, "Allocated delta slot");

        Ok(Allocation {
            catalog: catalog.to_string(),
            path: path.clone(),
            merge_type,
            ts_seq,
            pending_member: pending_member(&enc_path, ts_seq, merge_type),
        })
    }

    /// Promote the pending member to its committed form at the same score.
    /// Fails with `IndexCommitFailed` when the pending member was already
    /// swept; the delta is then never indexed.
    pub async fn commit(&self, allocation: &Allocation) -> LakeResult<()> {
        let delta_set = self.index.keys().delta_set(&allocation.catalog);
        let swapped = self
            .index
            .backend()
            .commit(
                &delta_set,
                &allocation.pending_member,
                &allocation.committed_member(),
                allocation.ts_seq.score(),
            )
            .await
            .map_err(LakeError::IndexCommitFailed)?;
        if !swapped {
            return Err(LakeError::IndexCommitFailed(IndexError::PendingMissing {
                member: allocation.pending_member.clone(),
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::error::ErrorKind;
    use crate::index::{IndexKeys, MemoryIndex, ScoreBound};
    use crate::tsseq::MAX_SEQ;
    use std::sync::Arc;

    const T0: u64 = 1_700_000_000;

    fn setup() -> (Allocator, IndexService, MemoryIndex, SimulatedClock) {
        let clock = SimulatedClock::at_secs(T0);
        let memory = MemoryIndex::with_clock(Arc::new(clock.clone()));
        let index = IndexService::new(Arc::new(memory.clone()), IndexKeys::new("memory", "t"));
        (Allocator::new(index.clone()), index, memory, clock)
    }

    #[tokio::test]
    async fn test_allocate_then_commit() {
        let (allocator, index, _, _) = setup();
        let path = FieldPath::parse("/a").unwrap();

        let alloc = allocator.allocate("c", &path, MergeType::Replace).await.unwrap();
        assert_eq!(alloc.ts_seq, TsSeq::new(T0 as i64, 1).unwrap());
        let window = index
            .read_window("c", ScoreBound::NegInf, ScoreBound::PosInf)
            .await
            .unwrap();
        assert_eq!(window.pending.len(), 1);
        assert!(window.deltas.is_empty());
        assert_eq!(window.pending[0].member, alloc.pending_member);

        allocator.commit(&alloc).await.unwrap();
        let window = index
            .read_window("c", ScoreBound::NegInf, ScoreBound::PosInf)
            .await
            .unwrap();
        assert!(window.pending.is_empty());
        assert_eq!(window.deltas.len(), 1);
        assert_eq!(window.deltas[0].ts_seq, alloc.ts_seq);
        assert_eq!(window.deltas[0].path, path);
    }

    #[tokio::test]
    async fn test_commit_after_pending_removed_fails() {
        let (allocator, index, _, _) = setup();
        let alloc = allocator
            .allocate("c", &FieldPath::parse("/a").unwrap(), MergeType::Replace)
            .await
            .unwrap();
        index
            .batch_remove(&index.keys().delta_set("c"), std::slice::from_ref(&alloc.pending_member))
            .await
            .unwrap();

        let err = allocator.commit(&alloc).await.unwrap_err();
        assert!(matches!(
            err,
            LakeError::IndexCommitFailed(IndexError::PendingMissing { .. })
        ));
        assert_eq!(index.delta_count("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overflow_maps_to_catalog_error() {
        let (allocator, _, memory, clock) = setup();
        let path = FieldPath::root();
        memory.prime_sequence(&encode_component("c"), T0 as i64, MAX_SEQ - 1);

        let last = allocator.allocate("c", &path, MergeType::Replace).await.unwrap();
        assert_eq!(last.ts_seq.seq(), MAX_SEQ);

        let err = allocator.allocate("c", &path, MergeType::Replace).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SeqOverflow);
        assert!(matches!(err, LakeError::SeqOverflow { ref catalog, .. } if catalog == "c"));

        // Other catalogs are unaffected
        assert!(allocator.allocate("d", &path, MergeType::Replace).await.is_ok());

        clock.advance_ms(1000);
        let next = allocator.allocate("c", &path, MergeType::Replace).await.unwrap();
        assert_eq!(next.ts_seq, TsSeq::new(T0 as i64 + 1, 1).unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct() {
        let (allocator, _, _, _) = setup();
        let allocator = Arc::new(allocator);
        let mut handles = Vec::new();
        for _ in 0..50 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move {
                allocator
                    .allocate("c", &FieldPath::root(), MergeType::Rfc7396)
                    .await
                    .unwrap()
                    .ts_seq
            }));
        }
        let mut seen = std::collections::BTreeSet::new();
        for h in handles {
            assert!(seen.insert(h.await.unwrap()));
        }
        assert_eq!(seen.len(), 50);
    }
}
