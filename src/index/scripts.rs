//! Server-side scripts for index backends that speak Lua
//!
//! The in-process index implements the same steps natively under its lock.

/// KEYS[1] = delta set, ARGV = {encCatalog, encPath, mergeType}
///
/// Returns `{ts, seq}`; errors with `SEQ_OVERFLOW {ts}` past 999999.
pub const ALLOCATE: &str = r#"
redis.replicate_commands()
local now = redis.call('TIME')
local ts = tonumber(now[1])
local seqKey = 'lake:seqid:' .. ARGV[1] .. ':' .. now[1]
if redis.call('SETNX', seqKey, 0) == 1 then
  redis.call('EXPIRE', seqKey, 5)
end
local seq = redis.call('INCR', seqKey)
if seq > 999999 then
  return redis.error_reply('SEQ_OVERFLOW ' .. now[1])
end
local tsSeq = now[1] .. '_' .. seq
local member = 'pending|delta|' .. ARGV[2] .. '|' .. tsSeq .. '|' .. ARGV[3]
redis.call('ZADD', KEYS[1], string.format('%d.%06d', ts, seq), member)
return {ts, seq}
"#;

/// KEYS[1] = delta set, ARGV = {pendingMember, committedMember, score}
///
/// Returns 0 without touching the set when the pending member is gone.
pub const COMMIT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) ~= 1 then
  return 0
end
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[2])
return 1
"#;

/// Error code raised by [`ALLOCATE`]
pub const SEQ_OVERFLOW: &str = "SEQ_OVERFLOW";
