//! Envelope-coded blob store with the catalog key layout
//!
//! Every put goes through [`envelope::encrypt`], every get through
//! [`envelope::decrypt`]. The namespace (`{kind}:{configName}`) salts cache
//! keys so tenants sharing a cache never alias.

use super::keys;
use super::object_store::BlobBackend;
use crate::envelope;
use crate::error::{LakeError, LakeResult};
use crate::merge::MergeType;
use crate::tsseq::TsSeq;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn BlobBackend>,
    aes_pwd: String,
    namespace: String,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("namespace", &self.namespace)
            .field("encrypted", &!self.aes_pwd.is_empty())
            .finish()
    }
}

impl Storage {
    pub fn new(backend: Arc<dyn BlobBackend>, aes_pwd: impl Into<String>, namespace: impl Into<String>) -> Self {
        Storage {
            backend,
            aes_pwd: aes_pwd.into(),
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backend(&self) -> &Arc<dyn BlobBackend> {
        &self.backend
    }

    pub fn make_delta_key(&self, catalog: &str, ts_seq: TsSeq, merge_type: MergeType) -> String {
        keys::delta_key(catalog, ts_seq, merge_type)
    }

    pub fn make_snap_key(&self, catalog: &str, start: TsSeq, stop: TsSeq) -> String {
        keys::snap_key(catalog, start, stop)
    }

    pub fn make_file_key(&self, catalog: &str, path: &str) -> String {
        keys::file_key(catalog, path)
    }

    pub async fn put(&self, key: &str, plain: &[u8]) -> LakeResult<()> {
        let sealed = envelope::encrypt(plain, &self.aes_pwd)?;
        self.backend
            .put(key, &sealed)
            .await
            .map_err(|e| LakeError::BlobPutFailed {
                key: key.to_string(),
                source: Arc::new(e),
            })
    }

    /// Raw read; a missing object surfaces as `Blob { op: "get", .. }`
    pub async fn get(&self, key: &str) -> LakeResult<Bytes> {
        let sealed = self
            .backend
            .get(key)
            .await
            .map_err(|e| LakeError::blob("get", key, e))?;
        Ok(Bytes::from(envelope::decrypt(&sealed, &self.aes_pwd)?))
    }

    /// Read a delta body. Missing or empty bodies are `MissingBody`.
    pub async fn get_delta(&self, key: &str) -> LakeResult<Bytes> {
        let sealed = self
            .backend
            .get(key)
            .await
            .map_err(|e| LakeError::from_delta_get(key, e))?;
        let plain = envelope::decrypt(&sealed, &self.aes_pwd)?;
        if plain.is_empty() {
            return Err(LakeError::MissingBody {
                key: key.to_string(),
            });
        }
        Ok(Bytes::from(plain))
    }

    pub async fn delete(&self, key: &str) -> LakeResult<()> {
        self.backend
            .delete(key)
            .await
            .map_err(|e| LakeError::blob("delete", key, e))
    }

    pub async fn exists(&self, key: &str) -> LakeResult<bool> {
        self.backend
            .exists(key)
            .await
            .map_err(|e| LakeError::blob("exists", key, e))
    }

    pub async fn list(&self, prefix: &str) -> LakeResult<Vec<String>> {
        self.backend
            .list(prefix)
            .await
            .map_err(|e| LakeError::blob("list", prefix, e))
    }

    /// Every blob key belonging to `catalog`
    pub async fn list_catalog(&self, catalog: &str) -> LakeResult<Vec<String>> {
        self.list(&keys::catalog_key_prefix(catalog)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobBackend;
    use crate::error::ErrorKind;

    fn storage(pwd: &str) -> (Storage, InMemoryBlobBackend) {
        let backend = InMemoryBlobBackend::new();
        (
            Storage::new(Arc::new(backend.clone()), pwd, "memory:test"),
            backend,
        )
    }

    #[tokio::test]
    async fn test_put_get_is_enveloped() {
        let (storage, backend) = storage("secret");
        storage.put("a/b.dat", b"{\"x\":1}").await.unwrap();

        let raw = backend.raw("a/b.dat").unwrap();
        assert_ne!(raw, b"{\"x\":1}");
        assert_eq!(&storage.get("a/b.dat").await.unwrap()[..], b"{\"x\":1}");
    }

    #[tokio::test]
    async fn test_wrong_password_fails_auth() {
        let (storage, backend) = storage("secret");
        storage.put("k", b"payload").await.unwrap();

        let other = Storage::new(Arc::new(backend), "other", "memory:test");
        assert_eq!(other.get("k").await.unwrap_err().kind(), ErrorKind::AuthFailure);
    }

    #[tokio::test]
    async fn test_missing_delta_is_missing_body() {
        let (storage, _) = storage("");
        let err = storage.get_delta("nope.dat").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingBody);

        storage.put("empty.dat", b"").await.unwrap();
        let err = storage.get_delta("empty.dat").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingBody);
    }

    #[tokio::test]
    async fn test_list_catalog() {
        let (storage, _) = storage("");
        let ts = TsSeq::new(100, 1).unwrap();
        let k1 = storage.make_delta_key("c1", ts, MergeType::Replace);
        let k2 = storage.make_snap_key("c1", TsSeq::ZERO, ts);
        let k3 = storage.make_delta_key("c2", ts, MergeType::Replace);
        for k in [&k1, &k2, &k3] {
            storage.put(k, b"{}").await.unwrap();
        }

        let keys = storage.list_catalog("c1").await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&k1) && keys.contains(&k2));
    }
}
