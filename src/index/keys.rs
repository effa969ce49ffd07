//! Index key names
//!
//! `{prefix}:{delta|snap|meta|sample}:{encCatalog}` with
//! `prefix = "{storageKind}:{configName}"`.

use crate::encoding::encode_component;

/// Key holding the process-wide config document
pub const CONFIG_KEY: &str = "lake.setting";

/// Allocator seq keys live this long, in seconds
pub const SEQ_KEY_TTL_SECS: u64 = 5;

pub fn seq_key(enc_catalog: &str, ts: i64) -> String {
    format!("lake:seqid:{}:{}", enc_catalog, ts)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKeys {
    prefix: String,
}

impl IndexKeys {
    pub fn new(storage_kind: &str, config_name: &str) -> Self {
        IndexKeys {
            prefix: format!("{}:{}", storage_kind, config_name),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, kind: &str, catalog: &str) -> String {
        format!("{}:{}:{}", self.prefix, kind, encode_component(catalog))
    }

    pub fn delta_set(&self, catalog: &str) -> String {
        self.key("delta", catalog)
    }

    pub fn snap_set(&self, catalog: &str) -> String {
        self.key("snap", catalog)
    }

    pub fn meta_hash(&self, catalog: &str) -> String {
        self.key("meta", catalog)
    }

    pub fn sample_set(&self, catalog: &str) -> String {
        self.key("sample", catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        let keys = IndexKeys::new("oss", "prod");
        assert_eq!(keys.delta_set("users"), "oss:prod:delta:(users");
        assert_eq!(keys.snap_set("users"), "oss:prod:snap:(users");
        assert_eq!(keys.meta_hash("users"), "oss:prod:meta:(users");
        assert_eq!(keys.sample_set("users"), "oss:prod:sample:(users");
        assert_eq!(seq_key("(users", 42), "lake:seqid:(users:42");
    }

    #[test]
    fn test_unsafe_catalog_is_encoded() {
        let keys = IndexKeys::new("local", "dev");
        let k = keys.delta_set("a b/c");
        assert!(k.starts_with("local:dev:delta:"));
        assert!(!k.contains(' '));
    }
}
