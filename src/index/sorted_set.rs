//! In-memory sorted set for the in-process index
//!
//! Member→score map for O(1) score lookups plus an ordered `(score, member)`
//! set for range scans. Ties on score order by member bytes.

use super::backend::ScoreBound;
use ahash::AHashMap;
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    members: AHashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(debug_assertions)]
    fn verify_invariants(&self) {
        debug_assert_eq!(
            self.members.len(),
            self.ordered.len(),
            "Invariant violated: members.len() ({}) != ordered.len() ({})",
            self.members.len(),
            self.ordered.len()
        );
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    fn verify_invariants(&self) {}

    /// Add or re-score a member. Returns true if the member is new.
    pub fn add(&mut self, member: &str, score: f64) -> bool {
        let is_new = match self.members.insert(member.to_string(), score) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.to_string()));
                false
            }
            None => true,
        };
        self.ordered.insert((Score(score), member.to_string()));
        self.verify_invariants();
        is_new
    }

    /// Returns true if the member was present
    pub fn remove(&mut self, member: &str) -> bool {
        let removed = match self.members.remove(member) {
            Some(score) => self.ordered.remove(&(Score(score), member.to_string())),
            None => false,
        };
        self.verify_invariants();
        removed
    }

    pub fn score(&self, member: &str) -> Option<f64> {
        self.members.get(member).copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members with `min <= score <= max` (bounds may be exclusive), ascending
    pub fn range_by_score(&self, min: ScoreBound, max: ScoreBound) -> Vec<(String, f64)> {
        self.ordered
            .iter()
            .skip_while(|(s, _)| !min.admits_from_below(s.0))
            .take_while(|(s, _)| max.admits_from_above(s.0))
            .map(|(s, m)| (m.clone(), s.0))
            .collect()
    }

    /// Rank range in descending order, `start..=stop`; negative indices count
    /// from the end as in Redis
    pub fn rev_range(&self, start: isize, stop: isize) -> Vec<(String, f64)> {
        let len = self.ordered.len() as isize;
        if len == 0 {
            return Vec::new();
        }
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Vec::new();
        }

        self.ordered
            .iter()
            .rev()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(s, m)| (m.clone(), s.0))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.ordered.iter().map(|(s, m)| (m.as_str(), s.0))
    }

    /// Always true for a correctly maintained set
    pub fn is_sorted(&self) -> bool {
        self.ordered
            .iter()
            .zip(self.ordered.iter().skip(1))
            .all(|(a, b)| a.0 .0 <= b.0 .0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_rescore_remove() {
        let mut z = SortedSet::new();
        assert!(z.add("a", 2.0));
        assert!(z.add("b", 1.0));
        assert!(!z.add("a", 0.5));
        assert_eq!(z.score("a"), Some(0.5));
        assert_eq!(z.iter().map(|(m, _)| m).collect::<Vec<_>>(), vec!["a", "b"]);

        assert!(z.remove("a"));
        assert!(!z.remove("a"));
        assert_eq!(z.len(), 1);
        assert!(z.is_sorted());
    }

    #[test]
    fn test_range_by_score_bounds() {
        let mut z = SortedSet::new();
        for (m, s) in [("x", 1.0), ("y", 2.0), ("z", 3.0)] {
            z.add(m, s);
        }
        let names = |v: Vec<(String, f64)>| v.into_iter().map(|(m, _)| m).collect::<Vec<_>>();

        assert_eq!(
            names(z.range_by_score(ScoreBound::NegInf, ScoreBound::PosInf)),
            vec!["x", "y", "z"]
        );
        assert_eq!(
            names(z.range_by_score(ScoreBound::Exclusive(1.0), ScoreBound::PosInf)),
            vec!["y", "z"]
        );
        assert_eq!(
            names(z.range_by_score(ScoreBound::NegInf, ScoreBound::Inclusive(2.0))),
            vec!["x", "y"]
        );
        assert_eq!(
            names(z.range_by_score(ScoreBound::Inclusive(2.0), ScoreBound::Exclusive(3.0))),
            vec!["y"]
        );
    }

    #[test]
    fn test_rev_range() {
        let mut z = SortedSet::new();
        for (m, s) in [("x", 1.0), ("y", 2.0), ("z", 3.0)] {
            z.add(m, s);
        }
        let top: Vec<_> = z.rev_range(0, 0).into_iter().map(|(m, _)| m).collect();
        assert_eq!(top, vec!["z"]);
        let all: Vec<_> = z.rev_range(0, -1).into_iter().map(|(m, _)| m).collect();
        assert_eq!(all, vec!["z", "y", "x"]);
        assert!(z.rev_range(5, 10).is_empty());
        assert!(SortedSet::new().rev_range(0, -1).is_empty());
    }
}
