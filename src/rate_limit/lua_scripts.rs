//! Atomic sliding-window check, mirroring the same CAS/claim pattern as the
//! job queue's Lua scripts.
//!
//! KEYS[1] = ratelimit:<kind>:<subject>
//! ARGV[1] = now_ms
//! ARGV[2] = window_ms
//! ARGV[3] = max
//! ARGV[4] = member (unique per call, so concurrent callers never collide)
//!
//! Returns `{allowed, count_after, oldest_score_ms}`.
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)

if count >= max then
    local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
    local oldest_score = now
    if oldest[2] then
        oldest_score = tonumber(oldest[2])
    end
    return {0, count, oldest_score}
end

redis.call('ZADD', key, now, member)
redis.call('PEXPIRE', key, window)
return {1, count + 1, now}
"#;
