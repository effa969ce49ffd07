//! S3-compatible blob backend
//!
//! Uses the `object_store` crate. Works against AWS S3 and S3-compatible
//! services (OSS, MinIO, LocalStack) through a custom endpoint.

use super::object_store::{BlobBackend, BlobFuture};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as ObjectStoreTrait;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::sync::Arc;

/// Connection settings, usually taken from the `lake.setting` config
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

#[derive(Clone)]
pub struct S3BlobBackend {
    store: Arc<dyn ObjectStoreTrait>,
}

impl S3BlobBackend {
    pub fn new(settings: &S3Settings) -> IoResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&settings.bucket)
            .with_region(settings.region.as_deref().unwrap_or("us-east-1"))
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_key);

        // Custom endpoint for S3-compatible services
        if let Some(endpoint) = settings.endpoint.as_deref().filter(|e| !e.is_empty()) {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(true);
        }

        let store = builder
            .build()
            .map_err(|e| IoError::new(ErrorKind::InvalidInput, format!("bucket {:?}: {}", settings.bucket, e)))?;

        Ok(S3BlobBackend {
            store: Arc::new(store),
        })
    }

    /// Wrap an existing object store (for testing)
    pub fn from_store(store: Arc<dyn ObjectStoreTrait>) -> Self {
        S3BlobBackend { store }
    }
}

/// Keep `NotFound` distinguishable; everything else is an opaque I/O error
fn io_error(err: object_store::Error) -> IoError {
    let kind = match err {
        object_store::Error::NotFound { .. } => ErrorKind::NotFound,
        object_store::Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
        _ => ErrorKind::Other,
    };
    IoError::new(kind, err)
}

impl std::fmt::Debug for S3BlobBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobBackend")
            .field("store", &self.store.to_string())
            .finish()
    }
}

impl BlobBackend for S3BlobBackend {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BlobFuture<'a, ()> {
        Box::pin(async move {
            self.store
                .put(&ObjectPath::from(key), bytes::Bytes::copy_from_slice(data).into())
                .await
                .map_err(io_error)?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BlobFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let result = self
                .store
                .get(&ObjectPath::from(key))
                .await
                .map_err(io_error)?;
            let data = result.bytes().await.map_err(io_error)?;
            Ok(data.to_vec())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BlobFuture<'a, ()> {
        Box::pin(async move {
            match self.store.delete(&ObjectPath::from(key)).await {
                Ok(()) => Ok(()),
                Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(io_error(e)),
            }
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BlobFuture<'a, bool> {
        Box::pin(async move {
            match self.store.head(&ObjectPath::from(key)).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(io_error(e)),
            }
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BlobFuture<'a, Vec<String>> {
        Box::pin(async move {
            use futures::TryStreamExt;

            let prefix_path = ObjectPath::from(prefix.trim_end_matches('/'));
            let metas: Vec<_> = self
                .store
                .list(Some(&prefix_path))
                .try_collect()
                .await
                .map_err(io_error)?;

            let mut keys: Vec<String> = metas
                .into_iter()
                .map(|m| m.location.to_string())
                .filter(|k| k.starts_with(prefix))
                .collect();
            keys.sort();
            Ok(keys)
        })
    }
}
