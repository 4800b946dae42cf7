//! `Idempotency-Key` handling for `POST /tables/:tableId/bets` (spec §4.E).
//!
//! A replay arriving while the original request is still in flight gets
//! `409 IDEMPOTENCY_CONFLICT`; a replay arriving after completion gets the
//! exact response the first call produced.

use crate::redis_state::RedisState;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

const TTL_SECONDS: i64 = 24 * 60 * 60;
const PROCESSING_SENTINEL: &str = "__processing__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

pub enum Claim {
    /// This caller won the race and must execute the handler, then call
    /// `complete`.
    Acquired,
    /// Another request already finished; replay this response verbatim.
    Replay(StoredResponse),
    /// Another request is still in flight.
    Conflict,
}

pub struct IdempotencyStore {
    redis: RedisState,
}

impl IdempotencyStore {
    pub fn new(redis: RedisState) -> Self {
        Self { redis }
    }

    fn key(idempotency_key: &str) -> String {
        format!("idempotency:{idempotency_key}")
    }

    pub async fn claim(&self, idempotency_key: &str) -> anyhow::Result<Claim> {
        let mut conn = self.redis.conn.clone();
        let key = Self::key(idempotency_key);

        let acquired: bool = redis::cmd("SET")
            .arg(&key)
            .arg(PROCESSING_SENTINEL)
            .arg("NX")
            .arg("EX")
            .arg(TTL_SECONDS)
            .query_async::<_, Option<String>>(&mut conn)
            .await?
            .is_some();

        if acquired {
            return Ok(Claim::Acquired);
        }

        let existing: Option<String> = conn.get(&key).await?;
        match existing {
            None => {
                // Key expired/evicted between the failed SET NX and our GET;
                // treat it as if we'd raced and lost, conservatively denying.
                Ok(Claim::Conflict)
            }
            Some(raw) if raw == PROCESSING_SENTINEL => Ok(Claim::Conflict),
            Some(raw) => {
                let stored: StoredResponse = serde_json::from_str(&raw)?;
                Ok(Claim::Replay(stored))
            }
        }
    }

    pub async fn complete(&self, idempotency_key: &str, response: &StoredResponse) -> anyhow::Result<()> {
        let mut conn = self.redis.conn.clone();
        let key = Self::key(idempotency_key);
        let body = serde_json::to_string(response)?;
        let _: () = conn.set_ex(&key, body, TTL_SECONDS as usize).await?;
        Ok(())
    }

    /// Releases the claim without recording a response, used when the
    /// handler itself fails before producing a cacheable result so a retry
    /// with the same key isn't permanently stuck behind the sentinel.
    pub async fn release(&self, idempotency_key: &str) -> anyhow::Result<()> {
        let mut conn = self.redis.conn.clone();
        let key = Self::key(idempotency_key);
        let _: () = conn.del(&key).await?;
        Ok(())
    }
}
