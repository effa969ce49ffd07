//! In-process index backend
//!
//! Everything sits behind one mutex, so each call (including the allocate
//! and commit scripts) is atomic with respect to every other call. The
//! "server clock" used by the allocator is injectable.

use super::backend::{AllocatedSeq, IndexBackend, IndexFuture, IndexResult, ScoreBound};
use super::keys::{seq_key, SEQ_KEY_TTL_SECS};
use super::member::pending_member;
use super::sorted_set::SortedSet;
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::IndexError;
use crate::merge::MergeType;
use crate::tsseq::{TsSeq, MAX_SEQ};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct StringEntry {
    value: Vec<u8>,
    expires_at: Option<Timestamp>,
}

#[derive(Default)]
struct MemoryState {
    zsets: AHashMap<String, SortedSet>,
    hashes: AHashMap<String, AHashMap<String, Vec<u8>>>,
    strings: AHashMap<String, StringEntry>,
}

impl MemoryState {
    fn live_string(&mut self, key: &str, now: Timestamp) -> Option<&mut StringEntry> {
        let expired = self
            .strings
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            self.strings.remove(key);
            return None;
        }
        self.strings.get_mut(key)
    }

    fn zset(&self, key: &str) -> Option<&SortedSet> {
        self.zsets.get(key)
    }

    fn zadd(&mut self, key: &str, score: f64, member: &str) {
        self.zsets
            .entry(key.to_string())
            .or_default()
            .add(member, score);
    }

    fn zrem(&mut self, key: &str, members: &[String]) -> usize {
        let Some(set) = self.zsets.get_mut(key) else {
            return 0;
        };
        let removed = members.iter().filter(|m| set.remove(m)).count();
        if set.is_empty() {
            self.zsets.remove(key);
        }
        removed
    }
}

fn ready<'a, T: Send + 'a>(result: IndexResult<T>) -> IndexFuture<'a, T> {
    Box::pin(std::future::ready(result))
}

#[derive(Clone)]
pub struct MemoryIndex {
    state: Arc<Mutex<MemoryState>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        MemoryIndex {
            state: Arc::new(Mutex::new(MemoryState::default())),
            clock,
        }
    }

    /// Set the allocator counter for `enc_catalog` at second `ts`, as if `seq`
    /// allocations had already happened in that second
    pub fn prime_sequence(&self, enc_catalog: &str, ts: i64, seq: i64) {
        let expires_at = Timestamp::from_millis(ts as u64 * 1000)
            + Duration::from_secs(SEQ_KEY_TTL_SECS + 1);
        self.state.lock().strings.insert(
            seq_key(enc_catalog, ts),
            StringEntry {
                value: seq.to_string().into_bytes(),
                expires_at: Some(expires_at),
            },
        );
    }

    /// Number of live keys of every type
    pub fn key_count(&self) -> usize {
        let now = self.clock.now();
        let state = self.state.lock();
        let live_strings = state
            .strings
            .values()
            .filter(|e| e.expires_at.map_or(true, |at| at > now))
            .count();
        state.zsets.len() + state.hashes.len() + live_strings
    }

    fn do_allocate(
        &self,
        delta_set: &str,
        enc_catalog: &str,
        enc_path: &str,
        merge_code: i64,
    ) -> IndexResult<AllocatedSeq> {
        let merge_type = MergeType::from_code(merge_code)
            .map_err(|e| IndexError::Script(e.to_string()))?;
        let now = self.clock.now();
        let ts = now.as_secs();
        let key = seq_key(enc_catalog, ts);

        let mut state = self.state.lock();
        let current = match state.live_string(&key, now) {
            Some(entry) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| IndexError::Script(format!("{} is not an integer", key)))?,
            None => {
                state.strings.insert(
                    key.clone(),
                    StringEntry {
                        value: b"0".to_vec(),
                        expires_at: Some(now + Duration::from_secs(SEQ_KEY_TTL_SECS)),
                    },
                );
                0
            }
        };

        let seq = current + 1;
        if let Some(entry) = state.strings.get_mut(&key) {
            entry.value = seq.to_string().into_bytes();
        }
        if seq > MAX_SEQ {
            return Err(IndexError::SeqOverflow { ts });
        }

        let ts_seq = TsSeq::new(ts, seq).map_err(|e| IndexError::Script(e.to_string()))?;
        let member = pending_member(enc_path, ts_seq, merge_type);
        state.zadd(delta_set, ts_seq.score(), &member);
        Ok(AllocatedSeq { ts, seq })
    }
}

impl IndexBackend for MemoryIndex {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn zadd<'a>(&'a self, key: &'a str, score: f64, member: &'a str) -> IndexFuture<'a, ()> {
        self.state.lock().zadd(key, score, member);
        ready(Ok(()))
    }

    fn zrem<'a>(&'a self, key: &'a str, members: &'a [String]) -> IndexFuture<'a, usize> {
        ready(Ok(self.state.lock().zrem(key, members)))
    }

    fn zrange_by_score<'a>(
        &'a self,
        key: &'a str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> IndexFuture<'a, Vec<(String, f64)>> {
        let state = self.state.lock();
        let out = state
            .zset(key)
            .map(|z| z.range_by_score(min, max))
            .unwrap_or_default();
        ready(Ok(out))
    }

    fn zrevrange<'a>(
        &'a self,
        key: &'a str,
        start: isize,
        stop: isize,
    ) -> IndexFuture<'a, Vec<(String, f64)>> {
        let state = self.state.lock();
        let out = state
            .zset(key)
            .map(|z| z.rev_range(start, stop))
            .unwrap_or_default();
        ready(Ok(out))
    }

    fn zscore<'a>(&'a self, key: &'a str, member: &'a str) -> IndexFuture<'a, Option<f64>> {
        let state = self.state.lock();
        ready(Ok(state.zset(key).and_then(|z| z.score(member))))
    }

    fn zcard<'a>(&'a self, key: &'a str) -> IndexFuture<'a, usize> {
        let state = self.state.lock();
        ready(Ok(state.zset(key).map_or(0, SortedSet::len)))
    }

    fn hset<'a>(&'a self, key: &'a str, field: &'a str, value: &'a [u8]) -> IndexFuture<'a, ()> {
        self.state
            .lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_vec());
        ready(Ok(()))
    }

    fn hget<'a>(&'a self, key: &'a str, field: &'a str) -> IndexFuture<'a, Option<Vec<u8>>> {
        let state = self.state.lock();
        ready(Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned()))
    }

    fn hmget<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [String],
    ) -> IndexFuture<'a, Vec<Option<Vec<u8>>>> {
        let state = self.state.lock();
        let hash = state.hashes.get(key);
        let out = fields
            .iter()
            .map(|f| hash.and_then(|h| h.get(f)).cloned())
            .collect();
        ready(Ok(out))
    }

    fn hgetall<'a>(&'a self, key: &'a str) -> IndexFuture<'a, Vec<(String, Vec<u8>)>> {
        let state = self.state.lock();
        let mut out: Vec<(String, Vec<u8>)> = state
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        ready(Ok(out))
    }

    fn hdel<'a>(&'a self, key: &'a str, field: &'a str) -> IndexFuture<'a, bool> {
        let mut state = self.state.lock();
        let Some(hash) = state.hashes.get_mut(key) else {
            return ready(Ok(false));
        };
        let existed = hash.remove(field).is_some();
        if hash.is_empty() {
            state.hashes.remove(key);
        }
        ready(Ok(existed))
    }

    fn get<'a>(&'a self, key: &'a str) -> IndexFuture<'a, Option<Vec<u8>>> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        ready(Ok(state.live_string(key, now).map(|e| e.value.clone())))
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a [u8]) -> IndexFuture<'a, ()> {
        self.state.lock().strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        ready(Ok(()))
    }

    fn allocate<'a>(
        &'a self,
        delta_set: &'a str,
        enc_catalog: &'a str,
        enc_path: &'a str,
        merge_code: i64,
    ) -> IndexFuture<'a, AllocatedSeq> {
        ready(self.do_allocate(delta_set, enc_catalog, enc_path, merge_code))
    }

    fn commit<'a>(
        &'a self,
        delta_set: &'a str,
        pending: &'a str,
        committed: &'a str,
        score: f64,
    ) -> IndexFuture<'a, bool> {
        let mut state = self.state.lock();
        if state.zrem(delta_set, std::slice::from_ref(&pending.to_string())) != 1 {
            return ready(Ok(false));
        }
        state.zadd(delta_set, score, committed);
        ready(Ok(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;

    const T0: u64 = 1_700_000_000;

    fn index_at(secs: u64) -> (MemoryIndex, SimulatedClock) {
        let clock = SimulatedClock::at_secs(secs);
        (MemoryIndex::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_allocate_is_monotonic_per_second() {
        let (index, clock) = index_at(T0);
        let a = index.allocate("d", "(c", "(/a", 1).await.unwrap();
        let b = index.allocate("d", "(c", "(/a", 1).await.unwrap();
        assert_eq!((a.ts, a.seq), (T0 as i64, 1));
        assert_eq!((b.ts, b.seq), (T0 as i64, 2));

        clock.advance_ms(1000);
        let c = index.allocate("d", "(c", "(/a", 1).await.unwrap();
        assert_eq!((c.ts, c.seq), (T0 as i64 + 1, 1));

        let pending = index.zrange_by_score("d", ScoreBound::NegInf, ScoreBound::PosInf).await.unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending.iter().all(|(m, _)| m.starts_with("pending|delta|(/a|")));
    }

    #[tokio::test]
    async fn test_catalogs_have_independent_sequences() {
        let (index, _clock) = index_at(T0);
        let a = index.allocate("d1", "(c1", "(/a", 1).await.unwrap();
        let b = index.allocate("d2", "(c2", "(/a", 1).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_overflow_and_recovery() {
        let (index, clock) = index_at(T0);
        index.prime_sequence("(c", T0 as i64, MAX_SEQ - 1);

        let last = index.allocate("d", "(c", "(/a", 1).await.unwrap();
        assert_eq!(last.seq, MAX_SEQ);
        let err = index.allocate("d", "(c", "(/a", 1).await.unwrap_err();
        assert_eq!(err, IndexError::SeqOverflow { ts: T0 as i64 });

        clock.advance_ms(1000);
        assert_eq!(index.allocate("d", "(c", "(/a", 1).await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_seq_key_expires() {
        let (index, clock) = index_at(T0);
        index.allocate("d", "(c", "(/a", 1).await.unwrap();
        assert!(index.get(&seq_key("(c", T0 as i64)).await.unwrap().is_some());

        clock.advance(Duration::from_secs(SEQ_KEY_TTL_SECS));
        assert!(index.get(&seq_key("(c", T0 as i64)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_swaps_member() {
        let (index, _clock) = index_at(T0);
        index.zadd("d", 1.5, "pending|x").await.unwrap();
        assert!(index.commit("d", "pending|x", "delta|x", 1.5).await.unwrap());
        let all = index.zrange_by_score("d", ScoreBound::NegInf, ScoreBound::PosInf).await.unwrap();
        assert_eq!(all, vec![("delta|x".to_string(), 1.5)]);
    }

    #[tokio::test]
    async fn test_commit_without_pending_adds_nothing() {
        let (index, _clock) = index_at(T0);
        assert!(!index.commit("d", "pending|x", "delta|x", 1.5).await.unwrap());
        assert!(index
            .zrange_by_score("d", ScoreBound::NegInf, ScoreBound::PosInf)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_hash_ops() {
        let index = MemoryIndex::new();
        index.hset("h", "b", b"2").await.unwrap();
        index.hset("h", "a", b"1").await.unwrap();
        assert_eq!(index.hget("h", "a").await.unwrap(), Some(b"1".to_vec()));

        let fields = vec!["a".to_string(), "zz".to_string()];
        assert_eq!(
            index.hmget("h", &fields).await.unwrap(),
            vec![Some(b"1".to_vec()), None]
        );
        assert_eq!(
            index.hgetall("h").await.unwrap(),
            vec![("a".to_string(), b"1".to_vec()), ("b".to_string(), b"2".to_vec())]
        );
        assert!(index.hdel("h", "a").await.unwrap());
        assert!(!index.hdel("h", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_zrem_batch() {
        let index = MemoryIndex::new();
        for (i, m) in ["a", "b", "c"].iter().enumerate() {
            index.zadd("z", i as f64, m).await.unwrap();
        }
        let gone = vec!["a".to_string(), "c".to_string(), "nope".to_string()];
        assert_eq!(index.zrem("z", &gone).await.unwrap(), 2);
        assert_eq!(index.zcard("z").await.unwrap(), 1);
        assert_eq!(index.zscore("z", "b").await.unwrap(), Some(1.0));
    }
}
