//! Catalog DST Tests
//!
//! Seed-based simulation of the full client over a fault-injecting blob
//! store. Every run is checked against a shadow model of the merged value.
//!
//! - **Calm**: no faults, every operation succeeds
//! - **Moderate**: a few percent of blob calls fail
//! - **Chaos**: frequent failures, invariants must still hold

use lakecat::dst::{run_dst_batch, summarize_batch, CatalogDSTConfig, CatalogDSTHarness};

fn failed_seeds(results: &[lakecat::dst::CatalogDSTResult]) -> Vec<u64> {
    results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect()
}

// =============================================================================
// Single Seed Tests
// =============================================================================

#[tokio::test]
async fn test_catalog_dst_single_calm() {
    let mut harness = CatalogDSTHarness::new(CatalogDSTConfig::calm(12345))
        .await
        .unwrap();
    harness.run(500).await;
    harness.check_invariants().await;

    let result = harness.result();
    println!("{}", result.summary());
    assert!(
        result.is_success(),
        "Calm mode should not violate invariants: {:?}",
        result.invariant_violations
    );
    assert_eq!(result.failed_operations, 0);
    assert!(result.snapshots > 0, "Reads should have scheduled snapshots");
}

#[tokio::test]
async fn test_catalog_dst_single_chaos() {
    let mut harness = CatalogDSTHarness::new(CatalogDSTConfig::chaos(99999))
        .await
        .unwrap();
    harness.run(300).await;
    harness.check_invariants().await;

    let result = harness.result();
    println!("{}", result.summary());
    println!("Blob stats: {:?}", result.blob_stats);
    assert!(result.is_success(), "{:?}", result.invariant_violations);
    assert!(result.failed_operations > 0, "Chaos should inject failures");
}

// =============================================================================
// Multi-Seed Batch Tests
// =============================================================================

#[tokio::test]
async fn test_catalog_dst_50_seeds_calm() {
    let results = run_dst_batch(0, 50, 100, CatalogDSTConfig::calm).await;
    println!("50 Seeds Calm:\n{}", summarize_batch(&results));
    assert!(failed_seeds(&results).is_empty(), "Failed seeds: {:?}", failed_seeds(&results));
}

#[tokio::test]
async fn test_catalog_dst_50_seeds_moderate() {
    let results = run_dst_batch(1000, 50, 100, CatalogDSTConfig::moderate).await;
    println!("50 Seeds Moderate:\n{}", summarize_batch(&results));
    assert!(failed_seeds(&results).is_empty(), "Failed seeds: {:?}", failed_seeds(&results));
}

#[tokio::test]
async fn test_catalog_dst_20_seeds_chaos() {
    let results = run_dst_batch(2000, 20, 100, CatalogDSTConfig::chaos).await;
    println!("20 Seeds Chaos:\n{}", summarize_batch(&results));

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    assert_eq!(total_ops, 20 * 100);
    assert!(failed_seeds(&results).is_empty(), "Failed seeds: {:?}", failed_seeds(&results));
}

// =============================================================================
// Determinism Verification
// =============================================================================

#[tokio::test]
async fn test_catalog_dst_determinism() {
    async fn run_seed(seed: u64) -> (u64, u64, u64) {
        let mut harness = CatalogDSTHarness::new(CatalogDSTConfig::calm(seed))
            .await
            .unwrap();
        harness.run(150).await;
        let result = harness.result();
        (result.successful_operations, result.writes, result.snapshots)
    }

    let seed = 42424242;
    assert_eq!(run_seed(seed).await, run_seed(seed).await);
}
