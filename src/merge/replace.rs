//! Replace (mt=1): the value at the path becomes the patch

use super::path::{set_at, FieldPath};
use super::{parse_json, MergeEngine, MergeType};
use crate::error::LakeResult;
use serde_json::Value;

pub struct ReplaceEngine;

impl MergeEngine for ReplaceEngine {
    fn merge_type(&self) -> MergeType {
        MergeType::Replace
    }

    fn apply(&self, doc: &mut Value, path: &FieldPath, patch: &[u8]) -> LakeResult<()> {
        let value = parse_json(patch, path)?;
        set_at(doc, path, value)
    }
}
