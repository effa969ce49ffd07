//! Redis-backed index
//!
//! One multiplexed connection shared by every caller. `Script` sends
//! `EVALSHA` and transparently re-loads the script on `NOSCRIPT`.

use super::backend::{AllocatedSeq, IndexBackend, IndexFuture, ScoreBound};
use super::scripts;
use crate::error::IndexError;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Script};
use std::collections::HashMap;

pub struct RedisIndex {
    conn: MultiplexedConnection,
    allocate: Script,
    commit: Script,
}

/// Timestamp carried by a `SEQ_OVERFLOW {ts}` script error
fn overflow_ts(text: &str) -> Option<i64> {
    let rest = text.split(scripts::SEQ_OVERFLOW).nth(1)?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn map_error(e: RedisError) -> IndexError {
    if e.is_io_error() {
        return IndexError::Connection(e.to_string());
    }
    let text = e.to_string();
    match overflow_ts(&text) {
        Some(ts) => IndexError::SeqOverflow { ts },
        None => IndexError::Script(text),
    }
}

impl RedisIndex {
    /// Connect to `redis://host:port/db`
    pub async fn connect(url: &str) -> Result<Self, IndexError> {
        let client = redis::Client::open(url).map_err(|e| IndexError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| IndexError::Connection(e.to_string()))?;
        Ok(RedisIndex {
            conn,
            allocate: Script::new(scripts::ALLOCATE),
            commit: Script::new(scripts::COMMIT),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

impl IndexBackend for RedisIndex {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn zadd<'a>(&'a self, key: &'a str, score: f64, member: &'a str) -> IndexFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn();
            let _: i64 = redis::cmd("ZADD")
                .arg(key)
                .arg(score.to_string())
                .arg(member)
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(())
        })
    }

    fn zrem<'a>(&'a self, key: &'a str, members: &'a [String]) -> IndexFuture<'a, usize> {
        Box::pin(async move {
            if members.is_empty() {
                return Ok(0);
            }
            let mut conn = self.conn();
            let removed: usize = redis::cmd("ZREM")
                .arg(key)
                .arg(members)
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(removed)
        })
    }

    fn zrange_by_score<'a>(
        &'a self,
        key: &'a str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> IndexFuture<'a, Vec<(String, f64)>> {
        Box::pin(async move {
            let mut conn = self.conn();
            let out: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
                .arg(key)
                .arg(min.to_arg())
                .arg(max.to_arg())
                .arg("WITHSCORES")
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(out)
        })
    }

    fn zrevrange<'a>(
        &'a self,
        key: &'a str,
        start: isize,
        stop: isize,
    ) -> IndexFuture<'a, Vec<(String, f64)>> {
        Box::pin(async move {
            let mut conn = self.conn();
            let out: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
                .arg(key)
                .arg(start)
                .arg(stop)
                .arg("WITHSCORES")
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(out)
        })
    }

    fn zscore<'a>(&'a self, key: &'a str, member: &'a str) -> IndexFuture<'a, Option<f64>> {
        Box::pin(async move {
            let mut conn = self.conn();
            let out: Option<f64> = redis::cmd("ZSCORE")
                .arg(key)
                .arg(member)
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(out)
        })
    }

    fn zcard<'a>(&'a self, key: &'a str) -> IndexFuture<'a, usize> {
        Box::pin(async move {
            let mut conn = self.conn();
            let out: usize = redis::cmd("ZCARD")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(out)
        })
    }

    fn hset<'a>(&'a self, key: &'a str, field: &'a str, value: &'a [u8]) -> IndexFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn();
            let _: i64 = redis::cmd("HSET")
                .arg(key)
                .arg(field)
                .arg(value)
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(())
        })
    }

    fn hget<'a>(&'a self, key: &'a str, field: &'a str) -> IndexFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let mut conn = self.conn();
            let out: Option<Vec<u8>> = redis::cmd("HGET")
                .arg(key)
                .arg(field)
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(out)
        })
    }

    fn hmget<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [String],
    ) -> IndexFuture<'a, Vec<Option<Vec<u8>>>> {
        Box::pin(async move {
            if fields.is_empty() {
                return Ok(Vec::new());
            }
            let mut conn = self.conn();
            let out: Vec<Option<Vec<u8>>> = redis::cmd("HMGET")
                .arg(key)
                .arg(fields)
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(out)
        })
    }

    fn hgetall<'a>(&'a self, key: &'a str) -> IndexFuture<'a, Vec<(String, Vec<u8>)>> {
        Box::pin(async move {
            let mut conn = self.conn();
            let map: HashMap<String, Vec<u8>> = redis::cmd("HGETALL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            let mut out: Vec<(String, Vec<u8>)> = map.into_iter().collect();
            out.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(out)
        })
    }

    fn hdel<'a>(&'a self, key: &'a str, field: &'a str) -> IndexFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn();
            let removed: i64 = redis::cmd("HDEL")
                .arg(key)
                .arg(field)
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(removed > 0)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> IndexFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let mut conn = self.conn();
            let out: Option<Vec<u8>> = redis::cmd("GET")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(out)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a [u8]) -> IndexFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn();
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(())
        })
    }

    fn allocate<'a>(
        &'a self,
        delta_set: &'a str,
        enc_catalog: &'a str,
        enc_path: &'a str,
        merge_code: i64,
    ) -> IndexFuture<'a, AllocatedSeq> {
        Box::pin(async move {
            let mut conn = self.conn();
            let (ts, seq): (i64, i64) = self
                .allocate
                .key(delta_set)
                .arg(enc_catalog)
                .arg(enc_path)
                .arg(merge_code)
                .invoke_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(AllocatedSeq { ts, seq })
        })
    }

    fn commit<'a>(
        &'a self,
        delta_set: &'a str,
        pending: &'a str,
        committed: &'a str,
        score: f64,
    ) -> IndexFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn();
            let swapped: i64 = self
                .commit
                .key(delta_set)
                .arg(pending)
                .arg(committed)
                .arg(score.to_string())
                .invoke_async(&mut conn)
                .await
                .map_err(map_error)?;
            Ok(swapped == 1)
        })
    }
}
