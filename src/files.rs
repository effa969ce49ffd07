//! Opaque per-catalog files
//!
//! A file is an envelope-coded blob under
//! `{md5(cat)[0:2]}/{encCatalog}/files/{encPath}.file` plus an opaque meta
//! value stored in the catalog's meta hash under the same path. Files have no
//! delta log and are not part of the merged document.

use crate::blob::Storage;
use crate::error::{LakeError, LakeResult};
use crate::index::IndexService;
use crate::writer::validate_catalog;
use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct WriteFileRequest {
    pub catalog: String,
    pub path: String,
    pub meta: Bytes,
    pub body: Bytes,
}

impl WriteFileRequest {
    pub fn new(
        catalog: impl Into<String>,
        path: impl Into<String>,
        meta: impl Into<Bytes>,
        body: impl Into<Bytes>,
    ) -> Self {
        WriteFileRequest {
            catalog: catalog.into(),
            path: path.into(),
            meta: meta.into(),
            body: body.into(),
        }
    }
}

/// `/`-rooted, no empty or relative segments, no `|`
fn validate_file_path(path: &str) -> LakeResult<()> {
    let invalid = || LakeError::InvalidPath(path.to_string());
    let rest = path.strip_prefix('/').ok_or_else(invalid)?;
    if rest.is_empty() || path.contains('|') {
        return Err(invalid());
    }
    if rest
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(invalid());
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FileStore {
    storage: Storage,
    index: IndexService,
}

impl FileStore {
    pub fn new(storage: Storage, index: IndexService) -> Self {
        FileStore { storage, index }
    }

    /// Store the body, then its meta
    pub async fn write_file(&self, req: &WriteFileRequest) -> LakeResult<()> {
        validate_catalog(&req.catalog)?;
        validate_file_path(&req.path)?;

        let key = self.storage.make_file_key(&req.catalog, &req.path);
        self.storage.put(&key, &req.body).await?;
        self.index
            .set_meta(&req.catalog, &req.path, &req.meta)
            .await
            .map_err(LakeError::MetaWriteFailed)?;

        debug!(catalog = %req.catalog, path = %req.path, size = req.body.len(), "File written");
        Ok(())
    }

    pub async fn read_file(&self, catalog: &str, path: &str) -> LakeResult<Bytes> {
        validate_file_path(path)?;
        self.storage
            .get(&self.storage.make_file_key(catalog, path))
            .await
    }

    pub async fn file_exists(&self, catalog: &str, path: &str) -> LakeResult<bool> {
        validate_file_path(path)?;
        self.storage
            .exists(&self.storage.make_file_key(catalog, path))
            .await
    }

    pub async fn meta(&self, catalog: &str, path: &str) -> LakeResult<Option<Bytes>> {
        Ok(self.index.meta(catalog, path).await?.map(Bytes::from))
    }

    /// Meta for each of `paths`, in order; `None` where a path has none
    pub async fn batch_meta(&self, catalog: &str, paths: &[String]) -> LakeResult<Vec<Option<Bytes>>> {
        Ok(self
            .index
            .batch_meta(catalog, paths)
            .await?
            .into_iter()
            .map(|m| m.map(Bytes::from))
            .collect())
    }

    pub async fn files_and_meta(&self, catalog: &str) -> LakeResult<BTreeMap<String, Bytes>> {
        Ok(self
            .index
            .all_meta(catalog)
            .await?
            .into_iter()
            .map(|(path, meta)| (path, Bytes::from(meta)))
            .collect())
    }

    /// Drop the body and the meta field. Deleting an absent file is not an error.
    pub async fn delete_file(&self, catalog: &str, path: &str) -> LakeResult<()> {
        validate_file_path(path)?;
        self.storage
            .delete(&self.storage.make_file_key(catalog, path))
            .await?;
        self.index.delete_meta(catalog, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobBackend;
    use crate::error::ErrorKind;
    use crate::index::{IndexKeys, MemoryIndex};
    use std::sync::Arc;

    fn store() -> FileStore {
        FileStore::new(
            Storage::new(Arc::new(InMemoryBlobBackend::new()), "pwd", "memory:t"),
            IndexService::new(Arc::new(MemoryIndex::new()), IndexKeys::new("memory", "t")),
        )
    }

    #[test]
    fn test_file_path_rules() {
        assert!(validate_file_path("/docs/report v2.pdf").is_ok());
        assert!(validate_file_path("docs").is_err());
        assert!(validate_file_path("/").is_err());
        assert!(validate_file_path("/a//b").is_err());
        assert!(validate_file_path("/a/../b").is_err());
        assert!(validate_file_path("/a|b").is_err());
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let files = store();
        let req = WriteFileRequest::new("c", "/img/logo.png", "{\"size\":3}", vec![1u8, 2, 3]);
        files.write_file(&req).await.unwrap();

        assert!(files.file_exists("c", "/img/logo.png").await.unwrap());
        assert_eq!(&files.read_file("c", "/img/logo.png").await.unwrap()[..], &[1, 2, 3]);
        assert_eq!(
            files.meta("c", "/img/logo.png").await.unwrap(),
            Some(Bytes::from_static(b"{\"size\":3}"))
        );

        files.delete_file("c", "/img/logo.png").await.unwrap();
        assert!(!files.file_exists("c", "/img/logo.png").await.unwrap());
        assert_eq!(files.meta("c", "/img/logo.png").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_batch_and_listing() {
        let files = store();
        for (path, meta) in [("/a", "1"), ("/b", "2")] {
            files
                .write_file(&WriteFileRequest::new("c", path, meta, "body"))
                .await
                .unwrap();
        }

        let metas = files
            .batch_meta("c", &["/b".to_string(), "/missing".to_string(), "/a".to_string()])
            .await
            .unwrap();
        assert_eq!(
            metas,
            vec![Some(Bytes::from_static(b"2")), None, Some(Bytes::from_static(b"1"))]
        );

        let all = files.files_and_meta("c").await.unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["/a", "/b"]);
        assert!(files.files_and_meta("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_path_has_no_effect() {
        let files = store();
        let err = files
            .write_file(&WriteFileRequest::new("c", "nope", "m", "b"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(files.files_and_meta("c").await.unwrap().is_empty());
    }
}
