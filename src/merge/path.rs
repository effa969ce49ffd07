//! Field paths and scoped document access
//!
//! A field path starts with `/`, never ends with `/`, and each segment is an
//! identifier `[A-Za-z_$][A-Za-z0-9_$.]*`. A `.` inside a segment nests one
//! level deeper, so `/profile.name` and `/profile/name` address the same
//! value. `/` alone is the document root. `|` is reserved by the index member
//! grammar and can never appear.

use crate::error::{LakeError, LakeResult};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    raw: String,
    keys: Vec<String>,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
}

impl FieldPath {
    pub fn root() -> Self {
        FieldPath {
            raw: "/".to_string(),
            keys: Vec::new(),
        }
    }

    pub fn parse(s: &str) -> LakeResult<Self> {
        let invalid = || LakeError::InvalidPath(s.to_string());
        if s == "/" {
            return Ok(Self::root());
        }
        if !s.starts_with('/') || s.ends_with('/') || s.contains('|') {
            return Err(invalid());
        }

        let mut keys = Vec::new();
        for segment in s[1..].split('/') {
            let mut chars = segment.chars();
            match chars.next() {
                Some(c) if is_ident_start(c) => {}
                _ => return Err(invalid()),
            }
            if !chars.all(is_ident_char) {
                return Err(invalid());
            }
            for part in segment.split('.') {
                if part.is_empty() {
                    return Err(invalid());
                }
                keys.push(part.to_string());
            }
        }

        Ok(FieldPath {
            raw: s.to_string(),
            keys,
        })
    }

    /// Engine-level scope: `""` also means the whole document
    pub fn parse_scope(s: &str) -> LakeResult<Self> {
        if s.is_empty() {
            Ok(Self::root())
        } else {
            Self::parse(s)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn is_root(&self) -> bool {
        self.keys.is_empty()
    }

    /// Canonical JSON-pointer form (`/a/b`), `"/"` for the root
    pub fn pointer(&self) -> String {
        pointer_of(&self.keys)
    }

    /// Canonical pointers of every proper ancestor, nearest first, ending at `/`
    pub fn ancestors(&self) -> Vec<String> {
        (0..self.keys.len())
            .rev()
            .map(|n| pointer_of(&self.keys[..n]))
            .collect()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn pointer_of(keys: &[String]) -> String {
    if keys.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for k in keys {
        out.push('/');
        out.push_str(&k.replace('~', "~0").replace('/', "~1"));
    }
    out
}

fn merge_err(path: &FieldPath, reason: impl Into<String>) -> LakeError {
    LakeError::MergeFailed {
        path: path.as_str().to_string(),
        reason: reason.into(),
    }
}

/// Value at `path`, if present
pub fn get_at<'v>(doc: &'v Value, path: &FieldPath) -> Option<&'v Value> {
    let mut cur = doc;
    for key in path.keys() {
        cur = match cur {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Set the value at `path`, creating intermediate objects. Scalars and nulls
/// in the way are replaced by objects; arrays must be indexed in range.
pub fn set_at(doc: &mut Value, path: &FieldPath, value: Value) -> LakeResult<()> {
    let Some((last, parents)) = path.keys().split_last() else {
        *doc = value;
        return Ok(());
    };

    let mut cur = doc;
    for key in parents {
        cur = child_mut(cur, key, path)?;
    }

    if !cur.is_object() && !cur.is_array() {
        *cur = Value::Object(Map::new());
    }
    match cur {
        Value::Array(items) => {
            let idx = array_index(items.len(), last, path)?;
            items[idx] = value;
        }
        Value::Object(map) => {
            map.insert(last.clone(), value);
        }
        _ => return Err(merge_err(path, "parent is not a container")),
    }
    Ok(())
}

fn child_mut<'v>(cur: &'v mut Value, key: &str, path: &FieldPath) -> LakeResult<&'v mut Value> {
    if !cur.is_object() && !cur.is_array() {
        *cur = Value::Object(Map::new());
    }
    match cur {
        Value::Array(items) => {
            let idx = array_index(items.len(), key, path)?;
            Ok(&mut items[idx])
        }
        Value::Object(map) => Ok(map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        _ => Err(merge_err(path, "parent is not a container")),
    }
}

fn array_index(len: usize, key: &str, path: &FieldPath) -> LakeResult<usize> {
    match key.parse::<usize>() {
        Ok(idx) if idx < len => Ok(idx),
        _ => Err(merge_err(
            path,
            format!("array index {:?} out of range (len {})", key, len),
        )),
    }
}
