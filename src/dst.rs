//! Deterministic simulation testing for catalogs
//!
//! Drives a [`Client`] over a fault-injecting blob store with a seeded
//! workload and checks it against a shadow model:
//!
//! ```text
//! for seed in 0..N {
//!     let mut harness = CatalogDSTHarness::new(CatalogDSTConfig::moderate(seed)).await?;
//!     harness.run(500).await;
//!     harness.check_invariants().await;   // violations carry the seed
//! }
//! ```
//!
//! The shadow keeps, per catalog, the flat `{field: int}` object every
//! committed write should have produced. Writes that fail leave a pending
//! entry behind; the harness then ages the simulated clock past the pending
//! TTL and sweeps so the catalog becomes readable again.

use crate::blob::{InMemoryBlobBackend, SimulatedBlobBackend, SimulatedBlobConfig, SimulatedBlobStats};
use crate::client::Client;
use crate::clock::SimulatedClock;
use crate::config::{ClientOptions, Config};
use crate::error::{ErrorKind, LakeError, LakeResult};
use crate::index::MemoryIndex;
use crate::merge::MergeType;
use crate::reader::ReadRequest;
use crate::writer::WriteRequest;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Fields a workload writes into
const FIELDS: usize = 6;

/// Configuration for catalog DST
#[derive(Debug, Clone)]
pub struct CatalogDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Blob store fault configuration
    pub blob_config: SimulatedBlobConfig,
    /// Number of catalogs the workload spreads over
    pub catalogs: usize,
    /// Probability of a write (the rest split between read, retention, sweep)
    pub write_probability: f64,
    pub read_probability: f64,
    pub retention_probability: f64,
    /// Maximum operations per run
    pub max_operations: usize,
}

impl Default for CatalogDSTConfig {
    fn default() -> Self {
        CatalogDSTConfig {
            seed: 0,
            blob_config: SimulatedBlobConfig {
                latency_range_us: (0, 0),
                ..SimulatedBlobConfig::default()
            },
            catalogs: 3,
            write_probability: 0.6,
            read_probability: 0.25,
            retention_probability: 0.1,
            max_operations: 1000,
        }
    }
}

impl CatalogDSTConfig {
    pub fn new(seed: u64) -> Self {
        CatalogDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// No faults
    pub fn calm(seed: u64) -> Self {
        CatalogDSTConfig {
            seed,
            blob_config: SimulatedBlobConfig::no_faults(),
            ..Default::default()
        }
    }

    /// A few percent of blob calls fail
    pub fn moderate(seed: u64) -> Self {
        CatalogDSTConfig {
            seed,
            blob_config: SimulatedBlobConfig {
                put_fail_prob: 0.05,
                get_fail_prob: 0.05,
                delete_fail_prob: 0.05,
                latency_range_us: (0, 0),
            },
            ..Default::default()
        }
    }

    /// Aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        CatalogDSTConfig {
            seed,
            blob_config: SimulatedBlobConfig {
                latency_range_us: (0, 0),
                ..SimulatedBlobConfig::high_chaos()
            },
            retention_probability: 0.15,
            ..Default::default()
        }
    }
}

/// Catalog operation type
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogOperation {
    /// Commit a delta
    Write {
        catalog: String,
        merge_type: MergeType,
        path: String,
        body: String,
    },
    /// List and materialize, optionally scheduling a snapshot
    Read { catalog: String, generate_snap: bool },
    /// Clear history keeping `keep_snaps` older snapshots
    Retention { catalog: String, keep_snaps: usize },
    /// Age pending entries past their TTL and sweep them
    Sweep { catalog: String },
}

impl CatalogOperation {
    pub fn catalog(&self) -> &str {
        match self {
            CatalogOperation::Write { catalog, .. }
            | CatalogOperation::Read { catalog, .. }
            | CatalogOperation::Retention { catalog, .. }
            | CatalogOperation::Sweep { catalog } => catalog,
        }
    }
}

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Success,
    /// Rejected with an error the fault model explains
    Failed(ErrorKind),
    /// Succeeded but disagreed with the shadow model
    Diverged(String),
}

#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub id: u64,
    pub operation: CatalogOperation,
    pub outcome: OperationOutcome,
    pub timestamp_ms: u64,
}

/// Workload generator plus the shadow model it is checked against
pub struct CatalogWorkload {
    rng: ChaCha8Rng,
    config: CatalogDSTConfig,
    catalogs: Vec<String>,
    /// Expected value per catalog, updated only by committed writes
    expected: HashMap<String, BTreeMap<String, i64>>,
    next_value: i64,
}

impl CatalogWorkload {
    pub fn new(config: CatalogDSTConfig) -> Self {
        let catalogs = (0..config.catalogs.max(1))
            .map(|i| format!("cat-{}", i))
            .collect::<Vec<_>>();
        CatalogWorkload {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            expected: catalogs
                .iter()
                .map(|c| (c.clone(), BTreeMap::new()))
                .collect(),
            catalogs,
            config,
            next_value: 0,
        }
    }

    pub fn catalogs(&self) -> &[String] {
        &self.catalogs
    }

    pub fn expected(&self, catalog: &str) -> Value {
        let map: Map<String, Value> = self
            .expected
            .get(catalog)
            .into_iter()
            .flatten()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        Value::Object(map)
    }

    /// Milliseconds the simulated clock moves before the next operation
    pub fn next_tick_ms(&mut self) -> u64 {
        self.rng.gen_range(0..1_500)
    }

    pub fn next_operation(&mut self) -> CatalogOperation {
        let catalog = self.catalogs[self.rng.gen_range(0..self.catalogs.len())].clone();
        let roll: f64 = self.rng.gen();
        let write = self.config.write_probability;
        let read = write + self.config.read_probability;
        let retention = read + self.config.retention_probability;

        if roll < write {
            self.next_write(catalog)
        } else if roll < read {
            CatalogOperation::Read {
                catalog,
                generate_snap: self.rng.gen_bool(0.7),
            }
        } else if roll < retention {
            CatalogOperation::Retention {
                catalog,
                keep_snaps: self.rng.gen_range(0..3),
            }
        } else {
            CatalogOperation::Sweep { catalog }
        }
    }

    fn next_write(&mut self, catalog: String) -> CatalogOperation {
        let field = format!("f{}", self.rng.gen_range(0..FIELDS));
        self.next_value += 1;
        let value = self.next_value;

        let (merge_type, path, body) = match self.rng.gen_range(0..10) {
            0..=4 => (MergeType::Replace, format!("/{}", field), value.to_string()),
            5..=6 => (MergeType::Rfc7396, "/".to_string(), json!({ field: value }).to_string()),
            7 => (MergeType::Rfc7396, "/".to_string(), json!({ field: null }).to_string()),
            8 => (
                MergeType::Rfc6902,
                "/".to_string(),
                json!([{ "op": "add", "path": format!("/{}", field), "value": value }]).to_string(),
            ),
            _ => (MergeType::Replace, "/".to_string(), json!({ field: value }).to_string()),
        };
        CatalogOperation::Write {
            catalog,
            merge_type,
            path,
            body,
        }
    }

    /// Fold a committed write into the shadow
    pub fn apply_committed(&mut self, op: &CatalogOperation) {
        let CatalogOperation::Write {
            catalog,
            merge_type,
            path,
            body,
        } = op
        else {
            return;
        };
        let Ok(parsed) = serde_json::from_str::<Value>(body) else {
            return;
        };
        let state = self.expected.entry(catalog.clone()).or_default();

        match (merge_type, path.as_str()) {
            (MergeType::Replace, "/") => {
                state.clear();
                absorb(state, &parsed);
            }
            (MergeType::Replace, field) => {
                if let Some(v) = parsed.as_i64() {
                    state.insert(field.trim_start_matches('/').to_string(), v);
                }
            }
            (MergeType::Rfc7396, _) => absorb(state, &parsed),
            (MergeType::Rfc6902, _) => {
                for op in parsed.as_array().into_iter().flatten() {
                    let field = op["path"].as_str().unwrap_or("").trim_start_matches('/');
                    if let Some(v) = op["value"].as_i64() {
                        state.insert(field.to_string(), v);
                    }
                }
            }
        }
    }
}

/// Merge-patch semantics over the flat shadow: null removes
fn absorb(state: &mut BTreeMap<String, i64>, patch: &Value) {
    for (k, v) in patch.as_object().into_iter().flatten() {
        match v.as_i64() {
            Some(n) => {
                state.insert(k.clone(), n);
            }
            None => {
                state.remove(k);
            }
        }
    }
}

/// Result of one DST run
#[derive(Debug, Clone)]
pub struct CatalogDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub writes: u64,
    pub reads: u64,
    pub retentions: u64,
    pub sweeps: u64,
    pub snapshots: u64,
    pub blob_stats: SimulatedBlobStats,
    pub invariant_violations: Vec<String>,
}

impl CatalogDSTResult {
    pub fn new(seed: u64) -> Self {
        CatalogDSTResult {
            seed,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            writes: 0,
            reads: 0,
            retentions: 0,
            sweeps: 0,
            snapshots: 0,
            blob_stats: SimulatedBlobStats::default(),
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} ok, {} failed), {} writes, {} reads, {} retentions, {} sweeps, {} snapshots, {} put failures, {} violations",
            self.seed,
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.writes,
            self.reads,
            self.retentions,
            self.sweeps,
            self.snapshots,
            self.blob_stats.put_failures,
            self.invariant_violations.len()
        )
    }
}

/// DST harness
pub struct CatalogDSTHarness {
    config: CatalogDSTConfig,
    client: Client,
    blobs: SimulatedBlobBackend<InMemoryBlobBackend>,
    clock: Arc<SimulatedClock>,
    pending_ttl: Duration,
    workload: CatalogWorkload,
    result: CatalogDSTResult,
    history: Vec<RecordedOperation>,
    next_op_id: u64,
}

impl CatalogDSTHarness {
    pub async fn new(config: CatalogDSTConfig) -> LakeResult<Self> {
        let clock = Arc::new(SimulatedClock::at_secs(1_700_000_000));
        let blobs = SimulatedBlobBackend::new(
            InMemoryBlobBackend::new(),
            config.seed,
            config.blob_config.clone(),
        );
        let options = ClientOptions::test();
        let pending_ttl = options.pending_ttl;

        // Config setup runs against a healthy store
        let client = Client::builder(options)
            .index_backend(Arc::new(MemoryIndex::with_clock(clock.clone())))
            .blob_backend(Arc::new(blobs.clone()))
            .clock(clock.clone())
            .config(Config::memory("dst"))
            .build()
            .await?;

        Ok(CatalogDSTHarness {
            workload: CatalogWorkload::new(config.clone()),
            result: CatalogDSTResult::new(config.seed),
            config,
            client,
            blobs,
            clock,
            pending_ttl,
            history: Vec::new(),
            next_op_id: 0,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations.min(self.config.max_operations) {
            let tick = self.workload.next_tick_ms();
            self.clock.advance_ms(tick);
            let op = self.workload.next_operation();
            self.execute_operation(op).await;
        }
    }

    async fn execute_operation(&mut self, op: CatalogOperation) {
        self.result.total_operations += 1;
        let outcome = match &op {
            CatalogOperation::Write {
                catalog,
                merge_type,
                path,
                body,
            } => {
                self.result.writes += 1;
                let req = WriteRequest::new(catalog.as_str(), path.as_str(), *merge_type, body.clone());
                match self.client.write(&req).await {
                    Ok(_) => {
                        self.workload.apply_committed(&op);
                        OperationOutcome::Success
                    }
                    Err(e) => {
                        // Leave the catalog readable again
                        self.age_out_pending(catalog).await;
                        OperationOutcome::Failed(e.kind())
                    }
                }
            }
            CatalogOperation::Read {
                catalog,
                generate_snap,
            } => {
                self.result.reads += 1;
                let outcome = self.check_read(catalog, *generate_snap).await;
                settle().await;
                outcome
            }
            CatalogOperation::Retention {
                catalog,
                keep_snaps,
            } => {
                self.result.retentions += 1;
                self.check_retention(catalog, *keep_snaps).await
            }
            CatalogOperation::Sweep { catalog } => {
                self.result.sweeps += 1;
                self.age_out_pending(catalog).await;
                OperationOutcome::Success
            }
        };

        match &outcome {
            OperationOutcome::Success => self.result.successful_operations += 1,
            OperationOutcome::Failed(_) => self.result.failed_operations += 1,
            OperationOutcome::Diverged(msg) => {
                self.result.failed_operations += 1;
                self.result.invariant_violations.push(format!(
                    "seed {} op {} {:?}: {}",
                    self.config.seed, self.next_op_id, op, msg
                ));
            }
        }

        self.history.push(RecordedOperation {
            id: self.next_op_id,
            operation: op,
            outcome,
            timestamp_ms: self.clock.current_ms(),
        });
        self.next_op_id += 1;
    }

    async fn check_read(&mut self, catalog: &str, generate_snap: bool) -> OperationOutcome {
        let req = ReadRequest::new(catalog).generate_snap(generate_snap);
        let list = match self.client.list_with(&req).await {
            Ok(list) => list,
            Err(e) => return OperationOutcome::Failed(e.kind()),
        };
        if list.has_pending {
            self.age_out_pending(catalog).await;
            return OperationOutcome::Failed(ErrorKind::PendingWrites);
        }
        if list.deltas.windows(2).any(|w| w[0].ts_seq >= w[1].ts_seq) {
            return OperationOutcome::Diverged("deltas out of order".to_string());
        }
        if let (Some(snap), Some(first)) = (list.snap, list.deltas.first()) {
            if first.ts_seq <= snap.stop {
                return OperationOutcome::Diverged(format!(
                    "delta {} is covered by snapshot ending {}",
                    first.ts_seq, snap.stop
                ));
            }
        }

        match self.client.read(&list).await {
            Ok(read) => {
                if read.scheduled_snap().is_some() {
                    self.result.snapshots += 1;
                }
                self.compare(catalog, read.decode::<Value>())
            }
            Err(e) => OperationOutcome::Failed(e.kind()),
        }
    }

    async fn check_retention(&mut self, catalog: &str, keep_snaps: usize) -> OperationOutcome {
        let latest_before = match self.client.snapshots(catalog).await {
            Ok(snaps) => snaps.last().copied(),
            Err(e) => return OperationOutcome::Failed(e.kind()),
        };

        let failure = match self
            .client
            .clear_history_with_retention(catalog, keep_snaps)
            .await
        {
            Ok(stats) if stats.kept != latest_before => {
                return OperationOutcome::Diverged(format!(
                    "retention kept {:?}, latest was {:?}",
                    stats.kept, latest_before
                ));
            }
            Ok(_) => None,
            Err(e @ LakeError::PartialDeleteFailure { .. }) => Some(e.kind()),
            Err(e) => return OperationOutcome::Failed(e.kind()),
        };

        match self.client.snapshots(catalog).await {
            Ok(after) if after.last().copied() != latest_before => {
                return OperationOutcome::Diverged("retention dropped the latest snapshot".into());
            }
            Ok(after) if latest_before.is_some() && after.len() > keep_snaps + 1 => {
                return OperationOutcome::Diverged(format!(
                    "{} snapshots left with keep_snaps={}",
                    after.len(),
                    keep_snaps
                ));
            }
            _ => {}
        }

        // The value must survive retention; a read may still hit a get fault
        match self.read_value(catalog).await {
            Ok(value) => match self.compare(catalog, Ok(value)) {
                OperationOutcome::Success => failure.map_or(OperationOutcome::Success, OperationOutcome::Failed),
                diverged => diverged,
            },
            Err(_) => failure.map_or(OperationOutcome::Success, OperationOutcome::Failed),
        }
    }

    async fn read_value(&self, catalog: &str) -> Result<Value, LakeError> {
        let list = self
            .client
            .list_with(&ReadRequest::new(catalog).generate_snap(false))
            .await?;
        self.client.read(&list).await?.decode()
    }

    fn compare(&self, catalog: &str, actual: Result<Value, LakeError>) -> OperationOutcome {
        let expected = self.workload.expected(catalog);
        match actual {
            Ok(actual) if actual == expected => OperationOutcome::Success,
            Ok(actual) => OperationOutcome::Diverged(format!(
                "read {} but expected {}",
                actual, expected
            )),
            Err(e) => OperationOutcome::Failed(e.kind()),
        }
    }

    /// Move the clock past the pending TTL and sweep `catalog`
    async fn age_out_pending(&mut self, catalog: &str) {
        self.clock
            .advance(self.pending_ttl + Duration::from_secs(1));
        // A failed sweep is retried by the next one
        let _ = self.client.sweep_pending(catalog).await;
    }

    /// Heal the store, clear leftovers, then compare every catalog with the
    /// shadow and check index ordering
    pub async fn check_invariants(&mut self) {
        self.blobs.set_config(SimulatedBlobConfig::no_faults());
        settle().await;

        let catalogs = self.workload.catalogs().to_vec();
        for catalog in &catalogs {
            self.age_out_pending(catalog).await;

            match self.read_value(catalog).await {
                Ok(value) => {
                    if let OperationOutcome::Diverged(msg) = self.compare(catalog, Ok(value)) {
                        self.violation(catalog, msg);
                    }
                }
                Err(e) => self.violation(catalog, format!("healed read failed: {}", e)),
            }

            match self.client.snapshots(catalog).await {
                Ok(snaps) => {
                    if snaps.iter().any(|s| s.start > s.stop) {
                        self.violation(catalog, "snapshot with start after stop".into());
                    }
                    if snaps.windows(2).any(|w| w[0].stop >= w[1].stop) {
                        self.violation(catalog, "snapshots out of order".into());
                    }
                }
                Err(e) => self.violation(catalog, format!("snapshot listing failed: {}", e)),
            }

            // Retention on a healed store must not change the value
            if self.client.clear_history(catalog).await.is_err() {
                self.violation(catalog, "healed retention failed".into());
            }
            if let Ok(value) = self.read_value(catalog).await {
                if let OperationOutcome::Diverged(msg) = self.compare(catalog, Ok(value)) {
                    self.violation(catalog, format!("after retention: {}", msg));
                }
            }
        }

        self.result.blob_stats = self.blobs.stats();
    }

    fn violation(&mut self, catalog: &str, msg: String) {
        self.result.invariant_violations.push(format!(
            "seed {} catalog {}: {}",
            self.config.seed, catalog, msg
        ));
    }

    pub fn history(&self) -> &[RecordedOperation] {
        &self.history
    }

    pub fn result(&self) -> &CatalogDSTResult {
        &self.result
    }

    pub fn into_result(self) -> CatalogDSTResult {
        self.result
    }
}

/// Let detached snapshot tasks finish
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Run `count` seeds starting at `base_seed`
pub async fn run_dst_batch<F>(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: F,
) -> Vec<CatalogDSTResult>
where
    F: Fn(u64) -> CatalogDSTConfig,
{
    let mut results = Vec::with_capacity(count);
    for i in 0..count as u64 {
        let seed = base_seed + i;
        let mut harness = match CatalogDSTHarness::new(config_fn(seed)).await {
            Ok(harness) => harness,
            Err(e) => {
                let mut result = CatalogDSTResult::new(seed);
                result.invariant_violations.push(format!("setup failed: {}", e));
                results.push(result);
                continue;
            }
        };
        harness.run(ops_per_run).await;
        harness.check_invariants().await;
        results.push(harness.into_result());
    }
    results
}

pub fn summarize_batch(results: &[CatalogDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_snaps: u64 = results.iter().map(|r| r.snapshots).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} snapshots",
        passed, total, total_ops, total_snaps
    );
    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }
    summary
}
