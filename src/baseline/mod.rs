//! Baseline store (spec §3 Baseline) — a mode-specific snapshot captured at
//! proposal-commit time, stored in Redis with a 6-hour TTL keyed by
//! `bet_id`. Immutable once written.

use crate::redis_state::RedisState;
use redis::AsyncCommands;
use uuid::Uuid;

const TTL_SECONDS: usize = 6 * 60 * 60;

pub struct BaselineStore {
    redis: RedisState,
}

impl BaselineStore {
    pub fn new(redis: RedisState) -> Self {
        Self { redis }
    }

    fn key(mode_key: &str, bet_id: Uuid) -> String {
        format!("{mode_key}:baseline:{bet_id}")
    }

    /// Fails if a baseline already exists for this bet — baselines are
    /// write-once.
    pub async fn put(&self, mode_key: &str, bet_id: Uuid, baseline: &serde_json::Value) -> anyhow::Result<()> {
        let mut conn = self.redis.conn.clone();
        let key = Self::key(mode_key, bet_id);
        let body = serde_json::to_string(baseline)?;
        let set: bool = redis::cmd("SET")
            .arg(&key)
            .arg(body)
            .arg("NX")
            .arg("EX")
            .arg(TTL_SECONDS)
            .query_async::<_, Option<String>>(&mut conn)
            .await?
            .is_some();
        if !set {
            anyhow::bail!("baseline already exists for bet {bet_id}");
        }
        Ok(())
    }

    pub async fn get(&self, mode_key: &str, bet_id: Uuid) -> anyhow::Result<Option<serde_json::Value>> {
        let mut conn = self.redis.conn.clone();
        let key = Self::key(mode_key, bet_id);
        let raw: Option<String> = conn.get(&key).await?;
        Ok(match raw {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        })
    }
}
