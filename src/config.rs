//! Configuration
//!
//! Two layers:
//!
//! - [`ClientOptions`]: process-local tuning (index URL, cache sizes, worker
//!   counts, janitor cadence). Loaded from TOML or `LAKECAT_*` variables.
//! - [`Config`]: the shared `lake.setting` document stored in the index,
//!   naming the blob store, its credentials and the AES password.
//!
//! ## Environment
//! - `LAKECAT_INDEX_URL`: `memory://` or `redis://host:port/db`
//! - `LAKECAT_DELTA_CACHE_TTL_SECS`, `LAKECAT_DELTA_CACHE_CAPACITY`
//! - `LAKECAT_FETCH_CONCURRENCY`, `LAKECAT_DELETE_CONCURRENCY`
//! - `LAKECAT_PENDING_TTL_SECS`, `LAKECAT_JANITOR_INTERVAL_SECS`

use crate::blob::{BlobBackend, LocalFsBlobBackend};
use crate::error::{LakeError, LakeResult};
use crate::index::SEQ_KEY_TTL_SECS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Blob store kind named by `lake.setting`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Process-local map (tests, demos)
    Memory,
    /// Directory on the local filesystem; `Bucket` is the root path
    Local,
    /// Alibaba OSS through its S3-compatible API
    Oss,
    S3,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Memory => "memory",
            StorageKind::Local => "local",
            StorageKind::Oss => "oss",
            StorageKind::S3 => "s3",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `lake.setting` document
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    pub name: String,
    pub storage: StorageKind,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Empty disables encryption; blobs are then only gzipped
    #[serde(rename = "AESPwd", default)]
    pub aes_pwd: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("name", &self.name)
            .field("storage", &self.storage)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("aes_pwd", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// In-memory store, no encryption
    pub fn memory(name: impl Into<String>) -> Self {
        Config {
            name: name.into(),
            storage: StorageKind::Memory,
            bucket: String::new(),
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            aes_pwd: String::new(),
        }
    }

    pub fn local(name: impl Into<String>, root: impl Into<String>) -> Self {
        Config {
            storage: StorageKind::Local,
            bucket: root.into(),
            ..Self::memory(name)
        }
    }

    pub fn with_aes_pwd(mut self, pwd: impl Into<String>) -> Self {
        self.aes_pwd = pwd.into();
        self
    }

    pub fn validate(&self) -> LakeResult<()> {
        if self.name.is_empty() {
            return Err(LakeError::InvalidInput("config Name is empty".into()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(LakeError::InvalidInput(format!(
                "config Name {:?} must be URL-safe",
                self.name
            )));
        }
        if self.storage != StorageKind::Memory && self.bucket.is_empty() {
            return Err(LakeError::InvalidInput(format!(
                "{} storage needs a Bucket",
                self.storage
            )));
        }
        Ok(())
    }

    /// `{storageKind}:{Name}`; prefixes index keys and salts cache keys
    pub fn namespace(&self) -> String {
        format!("{}:{}", self.storage, self.name)
    }

    pub fn from_json(bytes: &[u8]) -> LakeResult<Self> {
        let config: Config = serde_json::from_slice(bytes)
            .map_err(|e| LakeError::InvalidInput(format!("bad lake.setting document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> LakeResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| LakeError::Internal(format!("cannot encode config: {}", e)))
    }

    /// Open the blob backend this document names. `Memory` has no
    /// persistent identity, so the caller supplies one.
    pub fn open_blob_backend(
        &self,
        memory: &Arc<dyn BlobBackend>,
    ) -> LakeResult<Arc<dyn BlobBackend>> {
        match self.storage {
            StorageKind::Memory => Ok(memory.clone()),
            StorageKind::Local => Ok(Arc::new(LocalFsBlobBackend::new(&self.bucket))),
            StorageKind::Oss | StorageKind::S3 => self.open_s3(),
        }
    }

    #[cfg(feature = "s3")]
    fn open_s3(&self) -> LakeResult<Arc<dyn BlobBackend>> {
        use crate::blob::{S3BlobBackend, S3Settings};
        let settings = S3Settings {
            bucket: self.bucket.clone(),
            endpoint: Some(self.endpoint.clone()).filter(|e| !e.is_empty()),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            region: None,
        };
        let backend = S3BlobBackend::new(&settings)
            .map_err(|e| LakeError::InvalidInput(format!("cannot open {} store: {}", self.storage, e)))?;
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "s3"))]
    fn open_s3(&self) -> LakeResult<Arc<dyn BlobBackend>> {
        Err(LakeError::InvalidInput(format!(
            "{} storage requires the s3 feature",
            self.storage
        )))
    }
}

/// Process-local client tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub index_url: String,
    #[serde(with = "duration_secs")]
    pub delta_cache_ttl: Duration,
    pub delta_cache_capacity: usize,
    #[serde(with = "duration_secs")]
    pub cache_sweep_interval: Duration,
    #[serde(with = "duration_secs")]
    pub cache_stats_interval: Duration,
    /// Body-fetch workers per read
    pub fetch_concurrency: usize,
    /// Blob-delete workers per retention pass
    pub delete_concurrency: usize,
    /// Pending members older than this are removed by the janitor
    #[serde(with = "duration_secs")]
    pub pending_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub janitor_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            index_url: "memory://".to_string(),
            delta_cache_ttl: Duration::from_secs(60),
            delta_cache_capacity: 10_000,
            cache_sweep_interval: Duration::from_secs(60),
            cache_stats_interval: Duration::from_secs(10),
            fetch_concurrency: 10,
            delete_concurrency: 10,
            pending_ttl: Duration::from_secs(60),
            janitor_interval: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> LakeResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LakeError::InvalidInput(format!("{}={:?} is not valid", name, raw))),
        Err(_) => Ok(None),
    }
}

impl ClientOptions {
    /// Defaults for tests: in-memory index, short janitor cadence
    pub fn test() -> Self {
        ClientOptions {
            pending_ttl: Duration::from_secs(SEQ_KEY_TTL_SECS),
            janitor_interval: Duration::from_secs(SEQ_KEY_TTL_SECS),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> LakeResult<Self> {
        let options: ClientOptions = toml::from_str(s)
            .map_err(|e| LakeError::InvalidInput(format!("bad client options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Defaults overridden by any `LAKECAT_*` variables that are set
    pub fn from_env() -> LakeResult<Self> {
        let mut options = ClientOptions::default();
        if let Some(url) = env_parse::<String>("LAKECAT_INDEX_URL")? {
            options.index_url = url;
        }
        if let Some(secs) = env_parse::<u64>("LAKECAT_DELTA_CACHE_TTL_SECS")? {
            options.delta_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse("LAKECAT_DELTA_CACHE_CAPACITY")? {
            options.delta_cache_capacity = n;
        }
        if let Some(n) = env_parse("LAKECAT_FETCH_CONCURRENCY")? {
            options.fetch_concurrency = n;
        }
        if let Some(n) = env_parse("LAKECAT_DELETE_CONCURRENCY")? {
            options.delete_concurrency = n;
        }
        if let Some(secs) = env_parse::<u64>("LAKECAT_PENDING_TTL_SECS")? {
            options.pending_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LAKECAT_JANITOR_INTERVAL_SECS")? {
            options.janitor_interval = Duration::from_secs(secs);
        }
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> LakeResult<()> {
        let min = Duration::from_secs(SEQ_KEY_TTL_SECS);
        if self.pending_ttl < min || self.janitor_interval < min {
            return Err(LakeError::InvalidInput(format!(
                "pending_ttl and janitor_interval must be at least {}s",
                SEQ_KEY_TTL_SECS
            )));
        }
        if self.fetch_concurrency == 0 || self.delete_concurrency == 0 {
            return Err(LakeError::InvalidInput("worker counts must be positive".into()));
        }
        if self.delta_cache_capacity == 0 {
            return Err(LakeError::InvalidInput("delta_cache_capacity must be positive".into()));
        }
        if self.cache_sweep_interval.is_zero() || self.cache_stats_interval.is_zero() {
            return Err(LakeError::InvalidInput("cache intervals must be positive".into()));
        }
        Ok(())
    }
}

/// Serde helper for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobBackend;
    use crate::error::ErrorKind;

    #[test]
    fn test_config_wire_names() {
        let json = br#"{"Name":"prod","Storage":"oss","Bucket":"b","Endpoint":"https://oss.example.com","AccessKey":"ak","SecretKey":"sk","AESPwd":"pw"}"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.storage, StorageKind::Oss);
        assert_eq!(config.aes_pwd, "pw");
        assert_eq!(config.namespace(), "oss:prod");

        let back: serde_json::Value = serde_json::from_slice(&config.to_json().unwrap()).unwrap();
        assert_eq!(back["AESPwd"], "pw");
        assert_eq!(back["SecretKey"], "sk");
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::memory("ok-name_1").validate().is_ok());
        assert!(Config::memory("").validate().is_err());
        assert!(Config::memory("has space").validate().is_err());
        assert!(Config::local("x", "").validate().is_err());

        let err = Config::from_json(br#"{"Name":"x","Storage":"ftp"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::memory("x").with_aes_pwd("hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_open_blob_backend() {
        let memory: Arc<dyn BlobBackend> = Arc::new(InMemoryBlobBackend::new());
        let opened = Config::memory("x").open_blob_backend(&memory).unwrap();
        assert!(Arc::ptr_eq(&opened, &memory));

        let dir = tempfile::tempdir().unwrap();
        let local = Config::local("x", dir.path().to_string_lossy());
        assert!(local.open_blob_backend(&memory).is_ok());
    }

    #[test]
    fn test_options_from_toml() {
        let options = ClientOptions::from_toml_str(
            r#"
            index_url = "redis://127.0.0.1:6379/0"
            fetch_concurrency = 4
            pending_ttl = 120
            "#,
        )
        .unwrap();
        assert_eq!(options.index_url, "redis://127.0.0.1:6379/0");
        assert_eq!(options.fetch_concurrency, 4);
        assert_eq!(options.pending_ttl, Duration::from_secs(120));
        assert_eq!(options.delete_concurrency, 10);

        assert!(ClientOptions::from_toml_str("pending_ttl = 1").is_err());
        assert!(ClientOptions::from_toml_str("fetch_concurrency = 0").is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ClientOptions::default().validate().is_ok());
        assert!(ClientOptions::test().validate().is_ok());
    }
}
