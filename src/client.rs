//! Client façade
//!
//! ```text
//! Client ──► Runtime (per lake.setting) ──► Writer / FileStore / Reader /
//!   │                                       Retentioner / MotionSampler
//!   ├─ index backend (memory:// | redis://)
//!   ├─ delta cache (TTL) + snapshot cache (pluggable)
//!   └─ background: cache maintenance, pending janitor
//! ```
//!
//! The runtime is built from the `lake.setting` document on first use and
//! rebuilt after [`Client::update_config`]. Concurrent loads share one
//! index read.

use crate::allocator::Allocator;
use crate::blob::{BlobBackend, InMemoryBlobBackend, Storage};
use crate::cache::{spawn_maintenance, BlobCache, CacheStats, NoopSnapCache, TtlCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientOptions, Config};
use crate::error::{LakeError, LakeResult};
use crate::files::{FileStore, WriteFileRequest};
use crate::index::{self, IndexBackend, IndexKeys, IndexService, SnapInfo, CONFIG_KEY};
use crate::janitor::{Janitor, PendingRegistry, SweepStats};
use crate::motion::MotionSampler;
use crate::reader::{ListResult, ReadRequest, ReadResult, Reader};
use crate::retention::{RetentionStats, Retentioner};
use crate::singleflight::SingleFlight;
use crate::snapshot::SnapshotManager;
use crate::tsseq::TsSeq;
use crate::writer::{WriteRequest, Writer};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Hit/miss counters of both cache tiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientCacheStats {
    pub delta: CacheStats,
    pub snap: CacheStats,
}

/// Everything derived from one `lake.setting` document
struct Runtime {
    config: Config,
    storage: Storage,
    index: IndexService,
    writer: Writer,
    files: FileStore,
    reader: Reader,
    retention: Retentioner,
    motion: MotionSampler,
    janitor: Arc<Janitor>,
    janitor_stop: CancellationToken,
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.janitor_stop.cancel();
    }
}

struct Shared {
    options: ClientOptions,
    index_backend: Arc<dyn IndexBackend>,
    blob_override: Option<Arc<dyn BlobBackend>>,
    memory_blobs: Arc<dyn BlobBackend>,
    clock: Arc<dyn Clock>,
    delta_cache: Arc<dyn BlobCache>,
    snap_cache: Arc<dyn BlobCache>,
    pending: PendingRegistry,
    runtime: RwLock<Option<Arc<Runtime>>>,
    /// Bumped by every config update; a load started under an older
    /// generation does not install its runtime
    generation: AtomicU64,
    config_flight: SingleFlight<LakeResult<Arc<Runtime>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub struct ClientBuilder {
    options: ClientOptions,
    index_backend: Option<Arc<dyn IndexBackend>>,
    blob_backend: Option<Arc<dyn BlobBackend>>,
    snap_cache: Option<Arc<dyn BlobCache>>,
    clock: Option<Arc<dyn Clock>>,
    config: Option<Config>,
}

impl ClientBuilder {
    pub fn new(options: ClientOptions) -> Self {
        ClientBuilder {
            options,
            index_backend: None,
            blob_backend: None,
            snap_cache: None,
            clock: None,
            config: None,
        }
    }

    /// Use this index instead of connecting to `options.index_url`
    pub fn index_backend(mut self, backend: Arc<dyn IndexBackend>) -> Self {
        self.index_backend = Some(backend);
        self
    }

    /// Use this blob backend regardless of the config's `Storage`
    pub fn blob_backend(mut self, backend: Arc<dyn BlobBackend>) -> Self {
        self.blob_backend = Some(backend);
        self
    }

    /// Snapshot cache; the default stores nothing
    pub fn snap_cache(mut self, cache: Arc<dyn BlobCache>) -> Self {
        self.snap_cache = Some(cache);
        self
    }

    /// Clock the janitor ages pending entries by
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Store `config` as `lake.setting` before loading it
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub async fn build(self) -> LakeResult<Client> {
        self.options.validate()?;
        let index_backend = match self.index_backend {
            Some(backend) => backend,
            None => index::connect(&self.options.index_url).await?,
        };

        let delta_cache: Arc<dyn BlobCache> = Arc::new(TtlCache::new(
            "delta",
            self.options.delta_cache_ttl,
            self.options.delta_cache_capacity,
        ));
        let snap_cache = self
            .snap_cache
            .unwrap_or_else(|| Arc::new(NoopSnapCache::new()) as Arc<dyn BlobCache>);

        let shutdown = CancellationToken::new();
        let maintenance = spawn_maintenance(
            vec![delta_cache.clone(), snap_cache.clone()],
            self.options.cache_sweep_interval,
            self.options.cache_stats_interval,
            shutdown.child_token(),
        );

        let client = Client {
            shared: Arc::new(Shared {
                options: self.options,
                index_backend,
                blob_override: self.blob_backend,
                memory_blobs: Arc::new(InMemoryBlobBackend::new()),
                clock: self
                    .clock
                    .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
                delta_cache,
                snap_cache,
                pending: PendingRegistry::new(),
                runtime: RwLock::new(None),
                generation: AtomicU64::new(0),
                config_flight: SingleFlight::new(),
                shutdown,
                tasks: Mutex::new(vec![maintenance]),
            }),
        };

        match self.config {
            Some(config) => client.update_config(&config).await?,
            None => {
                client.runtime().await?;
            }
        }
        Ok(client)
    }
}

/// Catalog client. Clones share caches, connections and background tasks.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.shared.runtime.read().as_ref().map(|rt| rt.config.namespace());
        f.debug_struct("Client")
            .field("index", &self.shared.index_backend.name())
            .field("namespace", &config)
            .finish()
    }
}

impl Client {
    /// Connect with `options` and load `lake.setting`
    pub async fn new(options: ClientOptions) -> LakeResult<Self> {
        ClientBuilder::new(options).build().await
    }

    pub fn builder(options: ClientOptions) -> ClientBuilder {
        ClientBuilder::new(options)
    }

    async fn runtime(&self) -> LakeResult<Arc<Runtime>> {
        let current = self.shared.runtime.read().clone();
        if let Some(rt) = current {
            return Ok(rt);
        }
        self.shared
            .config_flight
            .run(CONFIG_KEY, || self.load_runtime())
            .await
    }

    async fn load_runtime(&self) -> LakeResult<Arc<Runtime>> {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        let raw = self
            .shared
            .index_backend
            .get(CONFIG_KEY)
            .await?
            .ok_or(LakeError::ConfigMissing)?;
        let config = Config::from_json(&raw)?;
        let runtime = Arc::new(self.build_runtime(config)?);

        {
            let mut slot = self.shared.runtime.write();
            if self.shared.generation.load(Ordering::SeqCst) == generation {
                *slot = Some(runtime.clone());
            }
        }
        info!(
            namespace = %runtime.config.namespace(),
            storage = %runtime.config.storage,
            encrypted = !runtime.config.aes_pwd.is_empty(),
            "Config loaded"
        );
        Ok(runtime)
    }

    fn build_runtime(&self, config: Config) -> LakeResult<Runtime> {
        let shared = &self.shared;
        let options = &shared.options;

        let blobs = match &shared.blob_override {
            Some(backend) => backend.clone(),
            None => config.open_blob_backend(&shared.memory_blobs)?,
        };
        let storage = Storage::new(blobs, config.aes_pwd.clone(), config.namespace());
        let index = IndexService::new(
            shared.index_backend.clone(),
            IndexKeys::new(config.storage.as_str(), &config.name),
        );

        let snapshots = Arc::new(SnapshotManager::new(
            storage.clone(),
            index.clone(),
            shared.snap_cache.clone(),
        ));
        let reader = Reader::new(
            storage.clone(),
            index.clone(),
            shared.delta_cache.clone(),
            shared.snap_cache.clone(),
            snapshots,
            shared.pending.clone(),
            options.fetch_concurrency,
        );
        let retention = Retentioner::new(
            storage.clone(),
            index.clone(),
            shared.delta_cache.clone(),
            shared.snap_cache.clone(),
            options.delete_concurrency,
        );

        let janitor = Arc::new(Janitor::new(
            storage.clone(),
            index.clone(),
            shared.clock.clone(),
            options.pending_ttl,
            shared.pending.clone(),
        ));
        let janitor_stop = shared.shutdown.child_token();
        let handle = janitor
            .clone()
            .spawn(options.janitor_interval, janitor_stop.clone());
        let mut tasks = shared.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);

        Ok(Runtime {
            writer: Writer::new(storage.clone(), Allocator::new(index.clone())),
            files: FileStore::new(storage.clone(), index.clone()),
            motion: MotionSampler::new(index.clone(), options.fetch_concurrency),
            reader,
            retention,
            janitor,
            janitor_stop,
            config,
            storage,
            index,
        })
    }

    // --- config ---

    pub async fn get_config(&self) -> LakeResult<Config> {
        Ok(self.runtime().await?.config.clone())
    }

    /// Validate and store `config`; the next operation runs against it
    pub async fn update_config(&self, config: &Config) -> LakeResult<()> {
        config.validate()?;
        self.shared
            .index_backend
            .set(CONFIG_KEY, &config.to_json()?)
            .await?;

        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.runtime.write().take();
        info!(namespace = %config.namespace(), "Config updated");
        self.runtime().await?;
        Ok(())
    }

    // --- deltas ---

    pub async fn write(&self, req: &WriteRequest) -> LakeResult<TsSeq> {
        self.runtime().await?.writer.write(req).await
    }

    pub async fn list(&self, catalog: &str) -> LakeResult<ListResult> {
        self.list_with(&ReadRequest::new(catalog)).await
    }

    pub async fn list_with(&self, req: &ReadRequest) -> LakeResult<ListResult> {
        self.runtime().await?.reader.list(req).await
    }

    /// Materialize a listed catalog. Fails with `PendingWrites` if the list
    /// saw uncommitted writes.
    pub async fn read(&self, list: &ListResult) -> LakeResult<ReadResult> {
        self.runtime().await?.reader.read(list).await
    }

    pub async fn read_bytes(&self, catalog: &str) -> LakeResult<Bytes> {
        let list = self.list(catalog).await?;
        Ok(self.read(&list).await?.into_bytes())
    }

    pub async fn read_string(&self, catalog: &str) -> LakeResult<String> {
        let list = self.list(catalog).await?;
        Ok(self.read(&list).await?.as_str()?.to_string())
    }

    pub async fn read_map(&self, catalog: &str) -> LakeResult<Map<String, Value>> {
        let list = self.list(catalog).await?;
        self.read(&list).await?.to_map()
    }

    pub async fn read_as<T: DeserializeOwned>(&self, catalog: &str) -> LakeResult<T> {
        let list = self.list(catalog).await?;
        self.read(&list).await?.decode()
    }

    // --- retention ---

    pub async fn clear_history(&self, catalog: &str) -> LakeResult<RetentionStats> {
        self.clear_history_with_retention(catalog, 0).await
    }

    pub async fn clear_history_with_retention(
        &self,
        catalog: &str,
        keep_snaps: usize,
    ) -> LakeResult<RetentionStats> {
        self.runtime()
            .await?
            .retention
            .clear_history_with_retention(catalog, keep_snaps)
            .await
    }

    // --- files ---

    pub async fn write_file(&self, req: &WriteFileRequest) -> LakeResult<()> {
        self.runtime().await?.files.write_file(req).await
    }

    pub async fn read_file(&self, catalog: &str, path: &str) -> LakeResult<Bytes> {
        self.runtime().await?.files.read_file(catalog, path).await
    }

    pub async fn file_exists(&self, catalog: &str, path: &str) -> LakeResult<bool> {
        self.runtime().await?.files.file_exists(catalog, path).await
    }

    pub async fn delete_file(&self, catalog: &str, path: &str) -> LakeResult<()> {
        self.runtime().await?.files.delete_file(catalog, path).await
    }

    pub async fn meta(&self, catalog: &str, path: &str) -> LakeResult<Option<Bytes>> {
        self.runtime().await?.files.meta(catalog, path).await
    }

    pub async fn batch_meta(
        &self,
        catalog: &str,
        paths: &[String],
    ) -> LakeResult<Vec<Option<Bytes>>> {
        self.runtime().await?.files.batch_meta(catalog, paths).await
    }

    pub async fn files_and_meta(&self, catalog: &str) -> LakeResult<BTreeMap<String, Bytes>> {
        self.runtime().await?.files.files_and_meta(catalog).await
    }

    // --- motion ---

    /// Run `callback` with the newest committed TsSeq across
    /// `motion_catalogs` if it moved since `indicator` was last sampled.
    /// Returns whether the callback ran.
    pub async fn motion_sample<F, Fut>(
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
        self.runtime()
            .await?
            .motion
            .sample(catalog, indicator, motion_catalogs, callback)
            .await
    }

    // --- maintenance & inspection ---

    /// Remove pending entries of `catalog` older than `pending_ttl`
    pub async fn sweep_pending(&self, catalog: &str) -> LakeResult<SweepStats> {
        self.runtime().await?.janitor.sweep(catalog).await
    }

    /// Snapshots of `catalog`, oldest first
    pub async fn snapshots(&self, catalog: &str) -> LakeResult<Vec<SnapInfo>> {
        self.runtime().await?.index.snaps(catalog).await
    }

    /// Index entries in the delta log, pending included
    pub async fn delta_count(&self, catalog: &str) -> LakeResult<usize> {
        self.runtime().await?.index.delta_count(catalog).await
    }

    /// Blob keys currently stored for `catalog`
    pub async fn blob_keys(&self, catalog: &str) -> LakeResult<Vec<String>> {
        self.runtime().await?.storage.list_catalog(catalog).await
    }

    pub fn cache_stats(&self) -> ClientCacheStats {
        ClientCacheStats {
            delta: self.shared.delta_cache.stats(),
            snap: self.shared.snap_cache.stats(),
        }
    }

    /// Stop background tasks. In-flight operations are not interrupted.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.shared.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::index::MemoryIndex;
    use crate::merge::MergeType;

    async fn client() -> Client {
        Client::builder(ClientOptions::test())
            .config(Config::memory("unit"))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_config_fails_construction() {
        let err = Client::new(ClientOptions::test()).await.unwrap_err();
        assert!(matches!(err, LakeError::ConfigMissing));
    }

    #[tokio::test]
    async fn test_config_loaded_from_shared_index() {
        let index: Arc<dyn IndexBackend> = Arc::new(MemoryIndex::new());
        let first = Client::builder(ClientOptions::test())
            .index_backend(index.clone())
            .config(Config::memory("shared").with_aes_pwd("pw"))
            .build()
            .await
            .unwrap();
        let second = Client::builder(ClientOptions::test())
            .index_backend(index)
            .build()
            .await
            .unwrap();
        assert_eq!(second.get_config().await.unwrap(), first.get_config().await.unwrap());
    }

    #[tokio::test]
    async fn test_update_config_switches_namespace() {
        let client = client().await;
        client
            .write(&WriteRequest::new("c", "/a", MergeType::Replace, "1"))
            .await
            .unwrap();
        assert_eq!(client.delta_count("c").await.unwrap(), 1);

        client.update_config(&Config::memory("other")).await.unwrap();
        assert_eq!(client.get_config().await.unwrap().name, "other");
        assert_eq!(client.delta_count("c").await.unwrap(), 0);
        assert_eq!(client.read_string("c").await.unwrap(), "{}");

        let err = client.update_config(&Config::memory("")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(client.get_config().await.unwrap().name, "other");
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let client = client().await;
        client
            .write(&WriteRequest::new("u", "/profile.name", MergeType::Replace, "\"Bob\""))
            .await
            .unwrap();
        assert_eq!(
            client.read_string("u").await.unwrap(),
            r#"{"profile":{"name":"Bob"}}"#
        );

        let map = client.read_map("u").await.unwrap();
        assert_eq!(map["profile"]["name"], "Bob");
    }

    #[tokio::test]
    async fn test_shutdown_stops_background_tasks() {
        let client = client().await;
        client.shutdown().await;
        assert!(client.shared.tasks.lock().is_empty());
    }
}
