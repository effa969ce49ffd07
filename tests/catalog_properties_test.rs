//! Catalog properties under concurrency and faults
//!
//! - ordering: committed deltas follow commit order
//! - replay: a snapshot read equals the replayed read
//! - retention: the merged value survives, dropped blobs leave no members
//! - single-flight: concurrent snapshot saves put one blob
//! - isolation: TsSeqs only need to be unique within a catalog
//! - pending gate: uncommitted writes block reads until swept
//! - late commit: a write whose pending entry was swept fails and leaves nothing

mod common;

use common::{client, simulated, wait_for_snapshots, write, START_SECS};
use lakecat::blob::BlobFuture;
use lakecat::error::IndexError;
use lakecat::{
    BlobBackend, ErrorKind, InMemoryBlobBackend, LakeError, MergeType, ReadRequest,
    SimulatedBlobBackend, SimulatedBlobConfig, WriteRequest,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_committed_deltas_follow_commit_order() {
    let client = client("props").await;
    let mut committed = Vec::new();
    for i in 0..20 {
        committed.push(write(&client, "o", "/n", MergeType::Replace, &i.to_string()).await);
    }

    let list = client.list("o").await.unwrap();
    let listed: Vec<_> = list.deltas.iter().map(|d| d.ts_seq).collect();
    assert_eq!(listed, committed);
    assert_eq!(client.read_string("o").await.unwrap(), r#"{"n":19}"#);
}

#[tokio::test]
async fn test_concurrent_writers_get_distinct_increasing_slots() {
    let client = client("props").await;
    let writes = (0..32).map(|i| {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .write(&WriteRequest::new("cc", format!("/k{}", i), MergeType::Replace, i.to_string()))
                .await
                .unwrap()
        })
    });
    let slots: Vec<_> = futures::future::join_all(writes)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let unique: HashSet<_> = slots.iter().collect();
    assert_eq!(unique.len(), 32);

    let list = client.list("cc").await.unwrap();
    assert_eq!(list.deltas.len(), 32);
    assert!(list.deltas.windows(2).all(|w| w[0].ts_seq < w[1].ts_seq));
    assert_eq!(client.read_map("cc").await.unwrap().len(), 32);
}

// =============================================================================
// Replay equivalence
// =============================================================================

#[tokio::test]
async fn test_snapshot_read_matches_replay() {
    let client = client("props").await;
    write(&client, "p", "/", MergeType::Replace, r#"{"tags":["a"],"n":1}"#).await;
    write(&client, "p", "/meta", MergeType::Rfc7396, r#"{"owner":"x","old":null}"#).await;
    write(
        &client,
        "p",
        "/",
        MergeType::Rfc6902,
        r#"[{"op":"add","path":"/tags/-","value":"b"},{"op":"remove","path":"/n"}]"#,
    )
    .await;

    let replayed = client.read_bytes("p").await.unwrap();
    wait_for_snapshots(&client, "p", 1).await;

    let list = client.list("p").await.unwrap();
    let from_snap = client.read(&list).await.unwrap();
    assert_eq!(from_snap.applied(), 0);
    assert_eq!(from_snap.as_bytes(), &replayed[..]);
    assert_eq!(
        from_snap.as_str().unwrap(),
        r#"{"meta":{"owner":"x"},"tags":["a","b"]}"#
    );
}

// =============================================================================
// Retention safety
// =============================================================================

#[tokio::test]
async fn test_retention_preserves_value_and_prunes_blobs() {
    let client = client("props").await;
    for round in 0..3 {
        for i in 0..3 {
            write(&client, "h", &format!("/r{}", i), MergeType::Replace, &round.to_string()).await;
        }
        client.read_bytes("h").await.unwrap();
        wait_for_snapshots(&client, "h", round + 1).await;
    }
    write(&client, "h", "/tail", MergeType::Replace, "true").await;
    let before = client.read_string("h").await.unwrap();
    let snaps = wait_for_snapshots(&client, "h", 4).await;
    assert_eq!(snaps.len(), 4);

    let stats = client.clear_history_with_retention("h", 1).await.unwrap();
    assert_eq!(stats.snaps_removed, 2);
    assert_eq!(stats.kept.map(|s| s.stop), snaps.last().map(|s| s.stop));

    let remaining = client.snapshots("h").await.unwrap();
    assert_eq!(remaining, snaps[2..].to_vec());

    let list = client
        .list_with(&ReadRequest::new("h").generate_snap(false))
        .await
        .unwrap();
    assert_eq!(client.read(&list).await.unwrap().as_str().unwrap(), before);

    // Every remaining blob is referenced and nothing else is left
    let blobs = client.blob_keys("h").await.unwrap();
    assert_eq!(
        blobs.len(),
        client.delta_count("h").await.unwrap() + remaining.len()
    );
}

// =============================================================================
// Single-flight
// =============================================================================

#[tokio::test]
async fn test_concurrent_reads_save_one_snapshot() {
    let blobs = SimulatedBlobBackend::new(
        InMemoryBlobBackend::new(),
        3,
        SimulatedBlobConfig::slow(Duration::from_millis(20)),
    );
    let f = simulated("props", Some(Arc::new(blobs.clone()) as Arc<dyn BlobBackend>)).await;
    for i in 0..3 {
        write(&f.client, "sf", "/n", MergeType::Replace, &i.to_string()).await;
    }
    blobs.reset_stats();

    let list = f.client.list("sf").await.unwrap();
    let reads = futures::future::join_all((0..8).map(|_| f.client.read(&list))).await;
    assert!(reads.iter().all(|r| r.is_ok()));

    let snaps = wait_for_snapshots(&f.client, "sf", 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(snaps.len(), 1);
    assert_eq!(blobs.stats().put_attempts, 1);
}

// =============================================================================
// Namespace isolation
// =============================================================================

#[tokio::test]
async fn test_slots_are_unique_per_catalog_only() {
    let f = simulated("props", None).await;
    let a = write(&f.client, "left", "/x", MergeType::Replace, "1").await;
    let b = write(&f.client, "right", "/x", MergeType::Replace, "1").await;
    assert_eq!(a, b);
    assert_eq!(a.timestamp(), START_SECS as i64);

    let a2 = write(&f.client, "left", "/x", MergeType::Replace, "2").await;
    assert!(a2 > a);
    assert_eq!(f.client.read_string("right").await.unwrap(), r#"{"x":1}"#);
    assert_eq!(f.client.read_string("left").await.unwrap(), r#"{"x":2}"#);
}

// =============================================================================
// Pending gate
// =============================================================================

#[tokio::test]
async fn test_failed_write_blocks_reads_until_swept() {
    let blobs = SimulatedBlobBackend::new(
        InMemoryBlobBackend::new(),
        9,
        SimulatedBlobConfig::no_faults(),
    );
    let f = simulated("props", Some(Arc::new(blobs.clone()) as Arc<dyn BlobBackend>)).await;
    write(&f.client, "g", "/ok", MergeType::Replace, "1").await;

    blobs.set_config(SimulatedBlobConfig {
        put_fail_prob: 1.0,
        ..SimulatedBlobConfig::no_faults()
    });
    let err = f
        .client
        .write(&WriteRequest::new("g", "/lost", MergeType::Replace, "2"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    blobs.set_config(SimulatedBlobConfig::no_faults());

    let list = f.client.list("g").await.unwrap();
    assert!(list.has_pending);
    assert_eq!(list.pending.len(), 1);
    let err = f.client.read(&list).await.unwrap_err();
    assert!(matches!(err, LakeError::PendingWrites { pending: 1, .. }));
    assert!(f.client.read_bytes("g").await.is_err());

    // Younger than the TTL: the sweep keeps it
    let stats = f.client.sweep_pending("g").await.unwrap();
    assert_eq!((stats.removed, stats.remaining), (0, 1));

    f.clock.advance(Duration::from_secs(6));
    let stats = f.client.sweep_pending("g").await.unwrap();
    assert_eq!((stats.removed, stats.remaining), (1, 0));
    assert_eq!(f.client.read_string("g").await.unwrap(), r#"{"ok":1}"#);
}

/// Holds the next put open after storing it, until released
#[derive(Clone, Default)]
struct StallingPut {
    inner: InMemoryBlobBackend,
    armed: Arc<AtomicBool>,
    stored: Arc<Notify>,
    release: Arc<Notify>,
}

impl BlobBackend for StallingPut {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BlobFuture<'a, ()> {
        Box::pin(async move {
            self.inner.put(key, data).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.stored.notify_one();
                self.release.notified().await;
            }
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BlobFuture<'a, Vec<u8>> {
        self.inner.get(key)
    }

    fn delete<'a>(&'a self, key: &'a str) -> BlobFuture<'a, ()> {
        self.inner.delete(key)
    }

    fn exists<'a>(&'a self, key: &'a str) -> BlobFuture<'a, bool> {
        self.inner.exists(key)
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BlobFuture<'a, Vec<String>> {
        self.inner.list(prefix)
    }
}

#[tokio::test]
async fn test_commit_after_sweep_fails_and_leaves_catalog_clean() {
    let blobs = StallingPut::default();
    let f = simulated("props", Some(Arc::new(blobs.clone()) as Arc<dyn BlobBackend>)).await;
    blobs.armed.store(true, Ordering::SeqCst);

    let req = WriteRequest::new("late", "/a", MergeType::Replace, "1");
    let (written, swept) = tokio::join!(f.client.write(&req), async {
        blobs.stored.notified().await;
        f.clock.advance(Duration::from_secs(120));
        let stats = f.client.sweep_pending("late").await.unwrap();
        blobs.release.notify_one();
        stats
    });

    assert_eq!(swept.removed, 1);
    let err = written.unwrap_err();
    assert!(matches!(
        err,
        LakeError::IndexCommitFailed(IndexError::PendingMissing { .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Transient);

    let list = f.client.list("late").await.unwrap();
    assert!(list.is_empty());
    assert!(!list.has_pending);
    assert_eq!(f.client.read_string("late").await.unwrap(), "{}");
    assert_eq!(f.client.delta_count("late").await.unwrap(), 0);
    assert!(blobs.inner.is_empty());
}
