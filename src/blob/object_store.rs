//! Blob backend abstraction
//!
//! Raw byte storage keyed by slash-separated paths. Backends know nothing
//! about envelopes or key layout; [`Storage`](super::Storage) adds both.
//!
//! Implementations:
//! - `InMemoryBlobBackend`: for unit tests and DST
//! - `LocalFsBlobBackend`: local directory, atomic writes via `.tmp` rename
//! - `S3BlobBackend`: S3-compatible object storage (feature-gated)

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

pub type BlobFuture<'a, T> = Pin<Box<dyn Future<Output = IoResult<T>> + Send + 'a>>;

/// Blob backend trait
pub trait BlobBackend: Send + Sync + 'static {
    /// Create or overwrite an object
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BlobFuture<'a, ()>;

    /// Read an object. Missing objects fail with `ErrorKind::NotFound`.
    fn get<'a>(&'a self, key: &'a str) -> BlobFuture<'a, Vec<u8>>;

    /// Delete an object. Deleting a missing object succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> BlobFuture<'a, ()>;

    fn exists<'a>(&'a self, key: &'a str) -> BlobFuture<'a, bool>;

    /// All keys starting with `prefix`, sorted
    fn list<'a>(&'a self, prefix: &'a str) -> BlobFuture<'a, Vec<String>>;
}

// ============================================================================
// InMemoryBlobBackend - For tests and DST
// ============================================================================

/// In-memory backend. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobBackend {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Raw stored bytes, bypassing the trait (for tests)
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    /// Every stored key, sorted (for tests)
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl BlobBackend for InMemoryBlobBackend {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BlobFuture<'a, ()> {
        Box::pin(async move {
            self.data.write().insert(key.to_string(), data.to_vec());
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BlobFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.data
                .read()
                .get(key)
                .cloned()
                .ok_or_else(|| IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key)))
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BlobFuture<'a, ()> {
        Box::pin(async move {
            self.data.write().remove(key);
            Ok(())
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BlobFuture<'a, bool> {
        Box::pin(async move { Ok(self.data.read().contains_key(key)) })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BlobFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut keys: Vec<String> = self
                .data
                .read()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }
}

// ============================================================================
// LocalFsBlobBackend
// ============================================================================

const TMP_SUFFIX: &str = ".tmp";

/// Local filesystem backend rooted at a directory
#[derive(Debug, Clone)]
pub struct LocalFsBlobBackend {
    base_path: PathBuf,
}

impl LocalFsBlobBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalFsBlobBackend {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> IoResult<PathBuf> {
        // Keys are relative and never climb out of the root
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|p| p == ".." || p.is_empty()) {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!("invalid blob key: {:?}", key),
            ));
        }
        Ok(self.base_path.join(key))
    }
}

impl BlobBackend for LocalFsBlobBackend {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BlobFuture<'a, ()> {
        Box::pin(async move {
            let path = self.full_path(key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut tmp = path.clone().into_os_string();
            tmp.push(TMP_SUFFIX);
            let tmp = PathBuf::from(tmp);

            tokio::fs::write(&tmp, data).await?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BlobFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let path = self.full_path(key)?;
            tokio::fs::read(&path).await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BlobFuture<'a, ()> {
        Box::pin(async move {
            let path = self.full_path(key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()), // Already deleted
                Err(e) => Err(e),
            }
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BlobFuture<'a, bool> {
        Box::pin(async move {
            let path = self.full_path(key)?;
            tokio::fs::try_exists(&path).await
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BlobFuture<'a, Vec<String>> {
        Box::pin(async move {
            let base = self.base_path.clone();
            let prefix = prefix.to_string();
            tokio::task::spawn_blocking(move || {
                let mut keys = Vec::new();
                if base.exists() {
                    walk_dir(&base, &base, &prefix, &mut keys)?;
                }
                keys.sort();
                Ok(keys)
            })
            .await
            .map_err(|e| IoError::new(ErrorKind::Other, e.to_string()))?
        })
    }
}

fn walk_dir(dir: &Path, base: &Path, prefix: &str, keys: &mut Vec<String>) -> IoResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(&path, base, prefix, keys)?;
        } else if path.is_file() {
            let Ok(rel) = path.strip_prefix(base) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.ends_with(TMP_SUFFIX) {
                continue;
            }
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
    }
    Ok(())
}
