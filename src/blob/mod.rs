//! Content-addressed blob store
//!
//! ```text
//! Storage (envelope + key layout + namespace)
//!    ↓
//! BlobBackend: InMemory | LocalFs | S3 | Simulated(fault injection)
//! ```

pub mod keys;
pub mod object_store;
pub mod simulated_store;
pub mod storage;
#[cfg(feature = "s3")]
pub mod s3_store;

pub use object_store::{BlobBackend, BlobFuture, InMemoryBlobBackend, LocalFsBlobBackend};
pub use simulated_store::{SimulatedBlobBackend, SimulatedBlobConfig, SimulatedBlobStats};
pub use storage::Storage;
#[cfg(feature = "s3")]
pub use s3_store::{S3BlobBackend, S3Settings};
