//! Time-sequence identifiers
//!
//! A [`TsSeq`] is `(timestamp seconds, seq)` with string form `"{ts}_{seq}"`
//! and ordering score `ts + seq / 1_000_000`. `"0_0"` is the only value with
//! `seq == 0` and sorts before any data.

use crate::error::{LakeError, LakeResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Largest allowed timestamp (3000-01-01T00:00:00Z)
pub const MAX_TIMESTAMP: i64 = 32_503_680_000;
/// Largest sequence number within one second
pub const MAX_SEQ: i64 = 999_999;
/// Seq denominator in the score encoding
pub const SEQ_SCALE: f64 = 1_000_000.0;
/// Largest timestamp (2^33 - 1, about year 2242) below which an `f64`
/// score still separates neighbouring seqs. Past it, the score's ulp
/// exceeds `1 / SEQ_SCALE` and adjacent values can share a score.
pub const MAX_EXACT_SCORE_TIMESTAMP: i64 = (1 << 33) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TsSeq {
    ts: i64,
    seq: i64,
}

impl TsSeq {
    /// The "before any data" sentinel
    pub const ZERO: TsSeq = TsSeq { ts: 0, seq: 0 };

    pub fn new(ts: i64, seq: i64) -> LakeResult<Self> {
        if ts == 0 && seq == 0 {
            return Ok(Self::ZERO);
        }
        if !(0..=MAX_TIMESTAMP).contains(&ts) || !(1..=MAX_SEQ).contains(&seq) {
            return Err(LakeError::InvalidTsSeq(format!("{}_{}", ts, seq)));
        }
        Ok(TsSeq { ts, seq })
    }

    pub fn parse(s: &str) -> LakeResult<Self> {
        let invalid = || LakeError::InvalidTsSeq(s.to_string());
        if s == "0_0" {
            return Ok(Self::ZERO);
        }

        let (ts_part, seq_part) = s.split_once('_').ok_or_else(invalid)?;
        if seq_part.len() > 6 {
            return Err(invalid());
        }
        let ts = parse_canonical_int(ts_part).ok_or_else(invalid)?;
        let seq = parse_canonical_int(seq_part).ok_or_else(invalid)?;
        TsSeq::new(ts, seq).map_err(|_| invalid())
    }

    pub fn timestamp(&self) -> i64 {
        self.ts
    }

    pub fn seq(&self) -> i64 {
        self.seq
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Ordering score used by the index.
    ///
    /// Distinct for every value up to [`MAX_EXACT_SCORE_TIMESTAMP`]; later
    /// timestamps parse but may collide in the index ordering.
    pub fn score(&self) -> f64 {
        // One rounding step, so this equals the index's parse of `score_arg`.
        (self.ts * 1_000_000 + self.seq) as f64 / SEQ_SCALE
    }

    /// Exact decimal rendering of [`score`](Self::score) for index commands
    pub fn score_arg(&self) -> String {
        format!("{}.{:06}", self.ts, self.seq)
    }
}

/// Digits only, no sign, no leading zeros (a lone "0" is fine)
fn parse_canonical_int(part: &str) -> Option<i64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if part.len() > 1 && part.starts_with('0') {
        return None;
    }
    part.parse().ok()
}

impl fmt::Display for TsSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.ts, self.seq)
    }
}

impl FromStr for TsSeq {
    type Err = LakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TsSeq::parse(s)
    }
}

impl Serialize for TsSeq {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TsSeq {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TsSeq::parse(&s).map_err(serde::de::Error::custom)
    }
}
