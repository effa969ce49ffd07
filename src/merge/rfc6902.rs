//! RFC-6902 JSON patch (mt=3)
//!
//! Before applying, every `add` gets its missing intermediate parents created
//! as empty objects, so `add /a/b/c` works on `{}`. The patch itself is
//! applied atomically: on any failing operation the document is unchanged.

use super::path::{get_at, set_at, FieldPath};
use super::{parse_json, MergeEngine, MergeType};
use crate::error::{LakeError, LakeResult};
use serde_json::{Map, Value};

pub struct JsonPatchEngine;

impl MergeEngine for JsonPatchEngine {
    fn merge_type(&self) -> MergeType {
        MergeType::Rfc6902
    }

    fn apply(&self, doc: &mut Value, path: &FieldPath, patch: &[u8]) -> LakeResult<()> {
        let raw = parse_json(patch, path)?;
        let fail = |reason: String| LakeError::MergeFailed {
            path: path.as_str().to_string(),
            reason,
        };

        let ops = raw
            .as_array()
            .ok_or_else(|| fail("JSON patch must be an array".to_string()))?;
        let add_paths: Vec<&str> = ops
            .iter()
            .filter(|op| op.get("op").and_then(Value::as_str) == Some("add"))
            .filter_map(|op| op.get("path").and_then(Value::as_str))
            .collect();

        let parsed: ::json_patch::Patch =
            serde_json::from_value(raw.clone()).map_err(|e| fail(e.to_string()))?;

        let mut sub = if path.is_root() {
            doc.clone()
        } else {
            get_at(doc, path)
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()))
        };
        for p in &add_paths {
            ensure_parents(&mut sub, p);
        }
        ::json_patch::patch(&mut sub, &parsed.0).map_err(|e| fail(e.to_string()))?;
        set_at(doc, path, sub)
    }
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Create missing object parents for the JSON pointer `pointer`. Stops at the
/// first value that is neither an object nor an existing array slot; the
/// patch then reports the error itself.
fn ensure_parents(doc: &mut Value, pointer: &str) {
    let Some(rest) = pointer.strip_prefix('/') else {
        return;
    };
    let tokens: Vec<String> = rest.split('/').map(unescape_token).collect();
    let Some((_, parents)) = tokens.split_last() else {
        return;
    };

    let mut cur = doc;
    for token in parents {
        cur = match cur {
            Value::Object(map) => map
                .entry(token.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => match token.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(item) => item,
                None => return,
            },
            _ => return,
        };
    }
}
