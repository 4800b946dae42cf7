//! Atomic, sliding-window quotas per subject, shared across process
//! instances (spec §4.D).

mod lua_scripts;

use crate::redis_state::RedisState;
use chrono::Utc;
use redis::Script;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitKind {
    Messages,
    Bets,
    Friends,
}

impl RateLimitKind {
    fn tag(&self) -> &'static str {
        match self {
            RateLimitKind::Messages => "messages",
            RateLimitKind::Bets => "bets",
            RateLimitKind::Friends => "friends",
        }
    }

    /// (max requests, window in milliseconds).
    fn quota(&self) -> (u32, i64) {
        match self {
            RateLimitKind::Messages => (20, 60_000),
            RateLimitKind::Bets => (5, 60_000),
            RateLimitKind::Friends => (10, 60_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix epoch seconds at which the window resets for this subject.
    pub reset_at: i64,
    /// Populated only when `allowed` is false.
    pub retry_after_secs: Option<u64>,
}

pub struct RateLimiter {
    redis: RedisState,
    script: Script,
}

impl RateLimiter {
    pub fn new(redis: RedisState) -> Self {
        Self {
            redis,
            script: Script::new(lua_scripts::SLIDING_WINDOW_SCRIPT),
        }
    }

    /// `subject` combines user and scope, e.g. `"<user_id>:<table_id>"`
    /// (spec §4.D). Fails open (allows the request) on Redis/Lua errors,
    /// logged at WARN, since an unavailable rate limiter must never take
    /// the whole write path down with it.
    pub async fn check(&self, kind: RateLimitKind, subject: &str) -> RateLimitDecision {
        let (max, window_ms) = kind.quota();
        let key = format!("ratelimit:{}:{}", kind.tag(), subject);
        let now_ms = Utc::now().timestamp_millis();
        let member = Uuid::new_v4().to_string();

        let mut conn = self.redis.conn.clone();
        let result: redis::RedisResult<(i64, i64, i64)> = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(max)
            .arg(member)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok((allowed, count, oldest_score)) => {
                let reset_at_ms = oldest_score + window_ms;
                let reset_at = reset_at_ms / 1000;
                if allowed == 1 {
                    RateLimitDecision {
                        allowed: true,
                        limit: max,
                        remaining: max.saturating_sub(count as u32),
                        reset_at,
                        retry_after_secs: None,
                    }
                } else {
                    crate::metrics::RATE_LIMIT_DENIALS_TOTAL.with_label_values(&[kind.tag()]).inc();
                    let retry_after_ms = (reset_at_ms - now_ms).max(0);
                    let retry_after_secs = ((retry_after_ms as f64) / 1000.0).ceil() as u64;
                    RateLimitDecision {
                        allowed: false,
                        limit: max,
                        remaining: 0,
                        reset_at,
                        retry_after_secs: Some(retry_after_secs.max(1)),
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, kind = kind.tag(), subject, "rate limiter failing open on Redis error");
                RateLimitDecision {
                    allowed: true,
                    limit: max,
                    remaining: max,
                    reset_at: (now_ms + window_ms) / 1000,
                    retry_after_secs: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotas_match_spec() {
        assert_eq!(RateLimitKind::Messages.quota(), (20, 60_000));
        assert_eq!(RateLimitKind::Bets.quota(), (5, 60_000));
        assert_eq!(RateLimitKind::Friends.quota(), (10, 60_000));
    }
}
