//! Merge engines
//!
//! Every delta carries a merge type and a field path. Replay folds the deltas
//! of a catalog, in score order, onto a base document:
//!
//! ```text
//! base ⟵ D1 ⟵ D2 ⟵ … ⟵ Dn
//! ```
//!
//! | code | engine        | semantics                                        |
//! |------|---------------|--------------------------------------------------|
//! | 1    | Replace       | set the value at the path                         |
//! | 2    | RFC-7396      | merge patch into the subtree at the path          |
//! | 3    | RFC-6902      | JSON patch on the subtree, parents auto-created   |

pub mod merge_patch;
pub mod path;
pub mod replace;
pub mod rfc6902;
pub mod updated;

pub use path::{get_at, set_at, FieldPath};
pub use updated::UpdatedAt;

use crate::error::{LakeError, LakeResult};
use crate::tsseq::TsSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeType {
    Replace,
    Rfc7396,
    Rfc6902,
}

impl MergeType {
    pub const ALL: [MergeType; 3] = [MergeType::Replace, MergeType::Rfc7396, MergeType::Rfc6902];

    pub fn code(&self) -> i64 {
        match self {
            MergeType::Replace => 1,
            MergeType::Rfc7396 => 2,
            MergeType::Rfc6902 => 3,
        }
    }

    pub fn from_code(code: i64) -> LakeResult<Self> {
        match code {
            1 => Ok(MergeType::Replace),
            2 => Ok(MergeType::Rfc7396),
            3 => Ok(MergeType::Rfc6902),
            other => Err(LakeError::UnknownMerge(other)),
        }
    }

    pub fn engine(&self) -> &'static dyn MergeEngine {
        match self {
            MergeType::Replace => &replace::ReplaceEngine,
            MergeType::Rfc7396 => &merge_patch::MergePatchEngine,
            MergeType::Rfc6902 => &rfc6902::JsonPatchEngine,
        }
    }
}

impl fmt::Display for MergeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeType::Replace => "replace",
            MergeType::Rfc7396 => "rfc7396",
            MergeType::Rfc6902 => "rfc6902",
        };
        f.write_str(name)
    }
}

impl Serialize for MergeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for MergeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        MergeType::from_code(code).map_err(serde::de::Error::custom)
    }
}

/// One merge strategy, applied in place to a parsed document
pub trait MergeEngine: Send + Sync {
    fn merge_type(&self) -> MergeType;

    fn apply(&self, doc: &mut Value, path: &FieldPath, patch: &[u8]) -> LakeResult<()>;
}

pub(crate) fn parse_json(bytes: &[u8], path: &FieldPath) -> LakeResult<Value> {
    serde_json::from_slice(bytes).map_err(|e| LakeError::MergeFailed {
        path: path.as_str().to_string(),
        reason: format!("invalid JSON: {}", e),
    })
}

/// A delta ready to be applied
#[derive(Debug, Clone)]
pub struct PatchRef<'a> {
    pub path: &'a FieldPath,
    pub merge_type: MergeType,
    pub ts_seq: TsSeq,
    pub body: &'a [u8],
}

/// Outcome of a replay
#[derive(Debug, Clone)]
pub struct Replayed {
    pub doc: Value,
    pub applied: usize,
    pub updated_at: UpdatedAt,
}

/// Fold `patches` (already in score order) onto `base`. An empty base is `{}`.
pub fn replay<'a, I>(base: &[u8], patches: I) -> LakeResult<Replayed>
where
    I: IntoIterator<Item = PatchRef<'a>>,
{
    let mut doc = if base.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        parse_json(base, &FieldPath::root())?
    };

    let mut applied = 0;
    let mut updated_at = UpdatedAt::new();
    for p in patches {
        if p.body.is_empty() {
            return Err(LakeError::MissingBody {
                key: format!("{}@{}", p.path, p.ts_seq),
            });
        }
        p.merge_type.engine().apply(&mut doc, p.path, p.body)?;
        updated_at.record(p.path, p.ts_seq);
        applied += 1;
    }

    Ok(Replayed {
        doc,
        applied,
        updated_at,
    })
}

/// Single-step merge over raw bytes: `base ⟵ patch` scoped to `field_path`
/// (`""` is the whole document)
pub fn merge_bytes(
    base: &[u8],
    patch: &[u8],
    field_path: &str,
    merge_type: MergeType,
) -> LakeResult<Vec<u8>> {
    let path = FieldPath::parse_scope(field_path)?;
    let mut doc = if base.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        parse_json(base, &FieldPath::root())?
    };
    merge_type.engine().apply(&mut doc, &path, patch)?;
    serde_json::to_vec(&doc).map_err(|e| LakeError::Internal(e.to_string()))
}
