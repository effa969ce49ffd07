//! RFC-7396 merge patch (mt=2)
//!
//! Scoped form: take the subtree at the path (`{}` when absent), merge the
//! patch into it, write it back.

use super::path::{get_at, set_at, FieldPath};
use super::{parse_json, MergeEngine, MergeType};
use crate::error::LakeResult;
use serde_json::{Map, Value};

pub struct MergePatchEngine;

impl MergeEngine for MergePatchEngine {
    fn merge_type(&self) -> MergeType {
        MergeType::Rfc7396
    }

    fn apply(&self, doc: &mut Value, path: &FieldPath, patch: &[u8]) -> LakeResult<()> {
        let patch = parse_json(patch, path)?;
        if path.is_root() {
            json_patch::merge(doc, &patch);
            return Ok(());
        }

        let mut sub = get_at(doc, path)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        json_patch::merge(&mut sub, &patch);
        set_at(doc, path, sub)
    }
}
