//! Index backend contract
//!
//! A backend speaks a small subset of a sorted-set/hash key-value service plus
//! two atomic scripts used by the writer. Implementations:
//! - [`MemoryIndex`](super::MemoryIndex): in-process, injectable clock
//! - `RedisIndex` (feature `redis-index`): Lua scripts over a multiplexed connection

use crate::error::IndexError;
use crate::tsseq::TsSeq;
use std::future::Future;
use std::pin::Pin;

pub type IndexResult<T> = Result<T, IndexError>;

pub type IndexFuture<'a, T> = Pin<Box<dyn Future<Output = IndexResult<T>> + Send + 'a>>;

/// One end of a score range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Inclusive(f64),
    Exclusive(f64),
}

impl ScoreBound {
    /// True if `score` is at or above this lower bound
    pub fn admits_from_below(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Inclusive(b) => score >= b,
            ScoreBound::Exclusive(b) => score > b,
        }
    }

    /// True if `score` is at or below this upper bound
    pub fn admits_from_above(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInf => false,
            ScoreBound::PosInf => true,
            ScoreBound::Inclusive(b) => score <= b,
            ScoreBound::Exclusive(b) => score < b,
        }
    }

    /// Range argument in the `-inf` / `(1.5` / `1.5` / `+inf` syntax
    pub fn to_arg(&self) -> String {
        match *self {
            ScoreBound::NegInf => "-inf".to_string(),
            ScoreBound::PosInf => "+inf".to_string(),
            ScoreBound::Inclusive(b) => format!("{}", b),
            ScoreBound::Exclusive(b) => format!("({}", b),
        }
    }

    pub fn after(ts_seq: TsSeq) -> Self {
        ScoreBound::Exclusive(ts_seq.score())
    }

    pub fn up_to(ts_seq: TsSeq) -> Self {
        ScoreBound::Inclusive(ts_seq.score())
    }
}

/// Result of the allocator script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedSeq {
    pub ts: i64,
    pub seq: i64,
}

pub trait IndexBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn zadd<'a>(&'a self, key: &'a str, score: f64, member: &'a str) -> IndexFuture<'a, ()>;

    /// Remove many members in one call; returns how many existed
    fn zrem<'a>(&'a self, key: &'a str, members: &'a [String]) -> IndexFuture<'a, usize>;

    fn zrange_by_score<'a>(
        &'a self,
        key: &'a str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> IndexFuture<'a, Vec<(String, f64)>>;

    /// Descending rank range, inclusive, negative indices from the end
    fn zrevrange<'a>(
        &'a self,
        key: &'a str,
        start: isize,
        stop: isize,
    ) -> IndexFuture<'a, Vec<(String, f64)>>;

    fn zscore<'a>(&'a self, key: &'a str, member: &'a str) -> IndexFuture<'a, Option<f64>>;

    fn zcard<'a>(&'a self, key: &'a str) -> IndexFuture<'a, usize>;

    fn hset<'a>(&'a self, key: &'a str, field: &'a str, value: &'a [u8]) -> IndexFuture<'a, ()>;

    fn hget<'a>(&'a self, key: &'a str, field: &'a str) -> IndexFuture<'a, Option<Vec<u8>>>;

    fn hmget<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [String],
    ) -> IndexFuture<'a, Vec<Option<Vec<u8>>>>;

    fn hgetall<'a>(&'a self, key: &'a str) -> IndexFuture<'a, Vec<(String, Vec<u8>)>>;

    /// Returns true if the field existed
    fn hdel<'a>(&'a self, key: &'a str, field: &'a str) -> IndexFuture<'a, bool>;

    fn get<'a>(&'a self, key: &'a str) -> IndexFuture<'a, Option<Vec<u8>>>;

    fn set<'a>(&'a self, key: &'a str, value: &'a [u8]) -> IndexFuture<'a, ()>;

    /// Atomically take the next `(ts, seq)` for `enc_catalog` from the server
    /// clock and record the pending member in `delta_set`. Fails with
    /// [`IndexError::SeqOverflow`] past 999,999 in one second.
    fn allocate<'a>(
        &'a self,
        delta_set: &'a str,
        enc_catalog: &'a str,
        enc_path: &'a str,
        merge_code: i64,
    ) -> IndexFuture<'a, AllocatedSeq>;

    /// Atomically replace `pending` with `committed` at `score`. Nothing is
    /// added when `pending` is no longer in the set; returns whether the
    /// swap happened.
    fn commit<'a>(
        &'a self,
        delta_set: &'a str,
        pending: &'a str,
        committed: &'a str,
        score: f64,
    ) -> IndexFuture<'a, bool>;
}
