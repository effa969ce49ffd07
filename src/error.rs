//! Error types for the catalog store
//!
//! Every fallible operation returns [`LakeResult`]. Errors are `Clone` because
//! single-flight coordination broadcasts one result to every waiter, so I/O
//! causes are kept behind an `Arc`.

use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::sync::Arc;

pub type LakeResult<T> = Result<T, LakeError>;

/// Coarse classification used by callers to decide whether to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad path, merge type, config or body. Rejected before any effect.
    InvalidInput,
    /// Blob or index I/O. Callers may retry.
    Transient,
    /// Allocator ran out of sequence numbers for the current second.
    SeqOverflow,
    /// A concurrent writer has not committed yet.
    PendingWrites,
    /// A delta is indexed but its body cannot be loaded.
    MissingBody,
    /// A delta could not be applied to the document.
    MergeFailed,
    /// Envelope failed to decompress or was truncated.
    CorruptEnvelope,
    /// AES-GCM tag mismatch.
    AuthFailure,
    /// Retention cleared the index but some blob deletions failed.
    PartialDeleteFailure,
}

/// Failures of the gzip + AES-GCM envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Input shorter than the smallest valid envelope
    UnexpectedEof,
    /// GCM authentication tag did not verify
    AuthFailure,
    /// Payload is not a valid gzip stream
    CorruptEnvelope(String),
    /// Sealing failed (compression or cipher error)
    Encrypt(String),
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::UnexpectedEof => write!(f, "unexpected EOF in envelope"),
            EnvelopeError::AuthFailure => write!(f, "envelope authentication failed"),
            EnvelopeError::CorruptEnvelope(msg) => write!(f, "corrupt envelope: {}", msg),
            EnvelopeError::Encrypt(msg) => write!(f, "envelope seal failed: {}", msg),
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// Failures reported by an index backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Could not reach the index service
    Connection(String),
    /// Unexpected reply shape or undecodable member
    Protocol(String),
    /// Server-side script failed
    Script(String),
    /// More than 999,999 allocations in one second for one catalog
    SeqOverflow { ts: i64 },
    /// Commit found no pending member to promote (swept as stale)
    PendingMissing { member: String },
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Connection(msg) => write!(f, "index connection error: {}", msg),
            IndexError::Protocol(msg) => write!(f, "index protocol error: {}", msg),
            IndexError::Script(msg) => write!(f, "index script error: {}", msg),
            IndexError::SeqOverflow { ts } => {
                write!(f, "sequence overflow at timestamp {}", ts)
            }
            IndexError::PendingMissing { member } => {
                write!(f, "pending member {} is gone", member)
            }
        }
    }
}

impl std::error::Error for IndexError {}

/// Error type for every catalog operation
#[derive(Debug, Clone)]
pub enum LakeError {
    /// Field path violates the path grammar
    InvalidPath(String),
    /// Merge type code outside {1, 2, 3}
    UnknownMerge(i64),
    /// TsSeq string failed to parse
    InvalidTsSeq(String),
    /// Other rejected input (config, body, options)
    InvalidInput(String),
    /// No `lake.setting` document in the index
    ConfigMissing,
    /// Allocator exhausted the per-second sequence
    SeqOverflow { catalog: String, ts: i64 },
    /// Delta or file body could not be stored
    BlobPutFailed { key: String, source: Arc<IoError> },
    /// Blob read/delete/list failure
    Blob { op: &'static str, key: String, source: Arc<IoError> },
    /// Pending member could not be promoted to committed
    IndexCommitFailed(IndexError),
    /// File meta could not be written
    MetaWriteFailed(IndexError),
    /// Any other index failure
    Index(IndexError),
    /// Uncommitted writes sit inside the read window
    PendingWrites { catalog: String, pending: usize },
    /// Delta is indexed but has no loadable body
    MissingBody { key: String },
    /// Delta could not be applied
    MergeFailed { path: String, reason: String },
    /// Envelope decode/encode failure
    Envelope(EnvelopeError),
    /// Some blob deletions failed after the index was cleared
    PartialDeleteFailure { failed: usize, first: String },
    /// Background task could not be joined
    Internal(String),
}

impl LakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LakeError::InvalidPath(_)
            | LakeError::UnknownMerge(_)
            | LakeError::InvalidTsSeq(_)
            | LakeError::InvalidInput(_)
            | LakeError::ConfigMissing => ErrorKind::InvalidInput,
            LakeError::SeqOverflow { .. } => ErrorKind::SeqOverflow,
            LakeError::PendingWrites { .. } => ErrorKind::PendingWrites,
            LakeError::MissingBody { .. } => ErrorKind::MissingBody,
            LakeError::MergeFailed { .. } => ErrorKind::MergeFailed,
            LakeError::Envelope(EnvelopeError::AuthFailure) => ErrorKind::AuthFailure,
            LakeError::Envelope(_) => ErrorKind::CorruptEnvelope,
            LakeError::PartialDeleteFailure { .. } => ErrorKind::PartialDeleteFailure,
            LakeError::Index(IndexError::SeqOverflow { .. }) => ErrorKind::SeqOverflow,
            LakeError::BlobPutFailed { .. }
            | LakeError::Blob { .. }
            | LakeError::IndexCommitFailed(_)
            | LakeError::MetaWriteFailed(_)
            | LakeError::Index(_)
            | LakeError::Internal(_) => ErrorKind::Transient,
        }
    }

    /// True for errors a caller can retry without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient
                | ErrorKind::SeqOverflow
                | ErrorKind::PendingWrites
                | ErrorKind::PartialDeleteFailure
        )
    }

    pub(crate) fn blob(op: &'static str, key: &str, source: IoError) -> Self {
        LakeError::Blob {
            op,
            key: key.to_string(),
            source: Arc::new(source),
        }
    }

    /// Blob read where a missing object means the delta body is gone
    pub(crate) fn from_delta_get(key: &str, source: IoError) -> Self {
        if source.kind() == IoErrorKind::NotFound {
            LakeError::MissingBody {
                key: key.to_string(),
            }
        } else {
            LakeError::blob("get", key, source)
        }
    }
}

impl std::fmt::Display for LakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LakeError::InvalidPath(p) => write!(f, "invalid field path: {:?}", p),
            LakeError::UnknownMerge(mt) => write!(f, "unknown merge type: {}", mt),
            LakeError::InvalidTsSeq(s) => write!(f, "invalid tsseq: {:?}", s),
            LakeError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            LakeError::ConfigMissing => write!(f, "config document lake.setting not found"),
            LakeError::SeqOverflow { catalog, ts } => write!(
                f,
                "sequence overflow for catalog {:?} at second {}, retry after the next second",
                catalog, ts
            ),
            LakeError::BlobPutFailed { key, source } => {
                write!(f, "blob put failed for {}: {}", key, source)
            }
            LakeError::Blob { op, key, source } => {
                write!(f, "blob {} failed for {}: {}", op, key, source)
            }
            LakeError::IndexCommitFailed(e) => write!(f, "index commit failed: {}", e),
            LakeError::MetaWriteFailed(e) => write!(f, "meta write failed: {}", e),
            LakeError::Index(e) => write!(f, "{}", e),
            LakeError::PendingWrites { catalog, pending } => write!(
                f,
                "catalog {:?} has {} pending write(s), retry later",
                catalog, pending
            ),
            LakeError::MissingBody { key } => write!(f, "delta body missing: {}", key),
            LakeError::MergeFailed { path, reason } => {
                write!(f, "merge failed at {:?}: {}", path, reason)
            }
            LakeError::Envelope(e) => write!(f, "{}", e),
            LakeError::PartialDeleteFailure { failed, first } => write!(
                f,
                "{} blob deletion(s) failed, first error: {}",
                failed, first
            ),
            LakeError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for LakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LakeError::BlobPutFailed { source, .. } | LakeError::Blob { source, .. } => {
                Some(source.as_ref())
            }
            LakeError::IndexCommitFailed(e) | LakeError::MetaWriteFailed(e) | LakeError::Index(e) => {
                Some(e)
            }
            LakeError::Envelope(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IndexError> for LakeError {
    fn from(e: IndexError) -> Self {
        LakeError::Index(e)
    }
}

impl From<EnvelopeError> for LakeError {
    fn from(e: EnvelopeError) -> Self {
        LakeError::Envelope(e)
    }
}
