//! Atomic enqueue/claim/retry/complete scripts.

/// KEYS[1] = job hash key, KEYS[2] = waiting zset
/// ARGV[1] = job_id, ARGV[2] = payload json, ARGV[3] = now_ms, ARGV[4] = max_attempts
///
/// First-writer-wins dedup: a job_id already present (waiting, active, or
/// not yet expired from completed/failed) is a no-op.
pub const ENQUEUE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], 'job_id', ARGV[1], 'payload', ARGV[2], 'attempts_made', 0, 'max_attempts', ARGV[4], 'created_at_ms', ARGV[3], 'status', 'waiting')
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
return 1
"#;

/// KEYS[1] = waiting zset, KEYS[2] = active zset
/// ARGV[1] = now_ms, ARGV[2] = limit
pub const CLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for i = 1, #ids do
    redis.call('ZREM', KEYS[1], ids[i])
    redis.call('ZADD', KEYS[2], ARGV[1], ids[i])
end
return ids
"#;

/// KEYS[1] = job hash, KEYS[2] = active zset, KEYS[3] = completed zset
/// ARGV[1] = job_id, ARGV[2] = now_ms, ARGV[3] = retain_count, ARGV[4] = retain_ms
pub const COMPLETE_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[1], 'status', 'completed', 'completed_at_ms', ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])
local cutoff = ARGV[2] - ARGV[4]
local stale = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', cutoff)
for i = 1, #stale do
    redis.call('ZREM', KEYS[3], stale[i])
    redis.call('DEL', 'bullmq:bet-resolution:job:' .. stale[i])
end
local overflow = redis.call('ZCARD', KEYS[3]) - tonumber(ARGV[3])
if overflow > 0 then
    local oldest = redis.call('ZRANGE', KEYS[3], 0, overflow - 1)
    for i = 1, #oldest do
        redis.call('ZREM', KEYS[3], oldest[i])
        redis.call('DEL', 'bullmq:bet-resolution:job:' .. oldest[i])
    end
end
return 1
"#;

/// KEYS[1] = job hash, KEYS[2] = active zset, KEYS[3] = waiting zset
/// ARGV[1] = job_id, ARGV[2] = retry_at_ms
/// Returns the post-increment attempt count.
pub const RETRY_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[2], ARGV[1])
local attempts = redis.call('HINCRBY', KEYS[1], 'attempts_made', 1)
redis.call('HSET', KEYS[1], 'status', 'waiting')
redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])
return attempts
"#;

/// KEYS[1] = job hash, KEYS[2] = active zset, KEYS[3] = failed zset
/// ARGV[1] = job_id, ARGV[2] = now_ms, ARGV[3] = error message
pub const DEAD_LETTER_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[1], 'status', 'failed', 'failed_at_ms', ARGV[2], 'last_error', ARGV[3])
redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])
return 1
"#;
