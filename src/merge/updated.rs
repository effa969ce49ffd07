//! Hierarchical "last changed" map
//!
//! Each applied delta stamps its own path and every ancestor with its TsSeq.
//! A path keeps the newest stamp it has seen; `/` therefore always holds the
//! newest change in the document.

use super::path::FieldPath;
use crate::tsseq::TsSeq;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct UpdatedAt {
    paths: BTreeMap<String, TsSeq>,
}

impl UpdatedAt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, path: &FieldPath, ts_seq: TsSeq) {
        self.bump(path.pointer(), ts_seq);
        for ancestor in path.ancestors() {
            self.bump(ancestor, ts_seq);
        }
    }

    fn bump(&mut self, pointer: String, ts_seq: TsSeq) {
        let slot = self.paths.entry(pointer).or_insert(ts_seq);
        if ts_seq > *slot {
            *slot = ts_seq;
        }
    }

    /// Newest change at or below `pointer` (canonical `/a/b` form)
    pub fn get(&self, pointer: &str) -> Option<TsSeq> {
        self.paths.get(pointer).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, TsSeq)> {
        self.paths.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
