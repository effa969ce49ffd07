//! lakecat: JSON catalogs kept as an append-only log of deltas in a blob
//! store, ordered by a sorted-set index, materialized by replay and
//! compacted into snapshots.

pub mod error;
pub mod tsseq;
pub mod clock;
pub mod encoding;
pub mod envelope;
pub mod singleflight;
pub mod blob;
pub mod merge;
pub mod cache;
pub mod index;
pub mod allocator;
pub mod snapshot;
pub mod writer;
pub mod reader;
pub mod files;
pub mod retention;
pub mod motion;
pub mod janitor;
pub mod config;
pub mod observability;
pub mod client;
pub mod dst;

pub use blob::{BlobBackend, InMemoryBlobBackend, LocalFsBlobBackend, SimulatedBlobBackend, SimulatedBlobConfig};
pub use cache::{BlobCache, CacheStats, NoopSnapCache, TtlCache};
pub use client::{Client, ClientBuilder, ClientCacheStats};
pub use clock::{Clock, SimulatedClock, SystemClock};
pub use config::{ClientOptions, Config, StorageKind};
pub use error::{ErrorKind, LakeError, LakeResult};
pub use files::WriteFileRequest;
pub use index::{DeltaInfo, IndexBackend, MemoryIndex, PendingInfo, SnapInfo};
pub use janitor::SweepStats;
pub use merge::{FieldPath, MergeType, UpdatedAt};
pub use reader::{ListResult, ReadRequest, ReadResult};
pub use retention::RetentionStats;
pub use tsseq::TsSeq;
pub use writer::WriteRequest;
