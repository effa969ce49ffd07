//! Metadata index
//!
//! Per catalog:
//!
//! ```text
//! {prefix}:delta:{enc}   sorted set   delta|… / pending|delta|…   score = tsSeq
//! {prefix}:snap:{enc}    sorted set   snap|{start}|{stop}         score = stop
//! {prefix}:meta:{enc}    hash         path → opaque file meta
//! {prefix}:sample:{enc}  sorted set   indicator                   score = lastUpdated
//! ```
//!
//! [`IndexService`] speaks catalogs and members; an [`IndexBackend`] speaks
//! sorted sets and hashes.

pub mod backend;
pub mod keys;
pub mod member;
pub mod memory;
#[cfg(feature = "redis-index")]
pub mod redis_backend;
pub mod scripts;
pub mod service;
pub mod sorted_set;

pub use backend::{AllocatedSeq, IndexBackend, IndexFuture, IndexResult, ScoreBound};
pub use keys::{IndexKeys, CONFIG_KEY, SEQ_KEY_TTL_SECS};
pub use member::{DeltaInfo, Member, PendingInfo, SnapInfo};
pub use memory::MemoryIndex;
#[cfg(feature = "redis-index")]
pub use redis_backend::RedisIndex;
pub use service::{DeltaWindow, IndexService, RemovalPlan};
pub use sorted_set::SortedSet;

use crate::error::{LakeError, LakeResult};
use std::sync::Arc;

/// Open the backend named by `url`: `memory://` or `redis://…`
pub async fn connect(url: &str) -> LakeResult<Arc<dyn IndexBackend>> {
    if url.starts_with("memory://") {
        return Ok(Arc::new(MemoryIndex::new()));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        #[cfg(feature = "redis-index")]
        {
            let index = RedisIndex::connect(url).await?;
            return Ok(Arc::new(index));
        }
        #[cfg(not(feature = "redis-index"))]
        {
            return Err(LakeError::Index(crate::error::IndexError::Connection(format!(
                "{} requires the redis-index feature",
                url
            ))));
        }
    }
    Err(LakeError::InvalidInput(format!(
        "unsupported index url {:?}",
        url
    )))
}
