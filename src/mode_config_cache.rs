//! §9 "denormalise the latest `mode_config` payload in an in-process LRU
//! cache keyed by `bet_id`" — avoids a `resolution_history` scan on every
//! live-info read and resolver tick.

use crate::db::models::EVENT_TYPE_MODE_CONFIG;
use lru::LruCache;
use parking_lot::Mutex;
use sqlx::{PgPool, Row};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use uuid::Uuid;

const TTL: Duration = Duration::from_secs(5 * 60);
const CAPACITY: usize = 10_000;

pub struct ModeConfigCache {
    inner: Mutex<LruCache<Uuid, (serde_json::Value, Instant)>>,
}

impl ModeConfigCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruCache::new(NonZeroUsize::new(CAPACITY).expect("capacity is non-zero"))),
        }
    }

    /// Invalidated by the resolver when it writes new history (spec §9).
    pub fn invalidate(&self, bet_id: Uuid) {
        self.inner.lock().pop(&bet_id);
    }

    pub async fn get(&self, db: &PgPool, bet_id: Uuid) -> anyhow::Result<Option<serde_json::Value>> {
        if let Some((value, fetched_at)) = self.inner.lock().get(&bet_id).cloned() {
            if fetched_at.elapsed() < TTL {
                return Ok(Some(value));
            }
        }

        let row = sqlx::query(
            "SELECT payload FROM resolution_history WHERE bet_id = $1 AND event_type = $2 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(bet_id)
        .bind(EVENT_TYPE_MODE_CONFIG)
        .fetch_optional(db)
        .await?;

        match row {
            Some(row) => {
                let payload: serde_json::Value = row.try_get("payload")?;
                self.inner.lock().put(bet_id, (payload.clone(), Instant::now()));
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }
}

impl Default for ModeConfigCache {
    fn default() -> Self {
        Self::new()
    }
}
