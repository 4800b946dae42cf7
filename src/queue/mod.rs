//! Resolution Queue (spec §4.G) — durable, single-writer-per-bet mutation
//! of bet status and history, with dedup, retries, and dead-letter.

mod keys;
mod lua_scripts;

use crate::redis_state::RedisState;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1_000;
const COMPLETED_RETAIN_COUNT: i64 = 1_000;
const COMPLETED_RETAIN_MS: i64 = 60 * 60 * 1_000;
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Job {
    SetWinningChoice {
        bet_id: Uuid,
        winning_choice: String,
        history: Option<HistoryEntry>,
    },
    WashBet {
        bet_id: Uuid,
        payload: serde_json::Value,
        explanation: String,
        event_type: String,
        mode_label: String,
    },
    RecordHistory {
        bet_id: Uuid,
        event_type: String,
        payload: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// A job that exhausted retries, surfaced for operator triage (spec §4.G).
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterJob {
    pub job_id: String,
    pub bet_id: Option<Uuid>,
    pub job_type: Option<String>,
    pub attempts_made: u32,
    pub last_error: Option<String>,
}

impl Job {
    fn bet_id(&self) -> Uuid {
        match self {
            Job::SetWinningChoice { bet_id, .. } => *bet_id,
            Job::WashBet { bet_id, .. } => *bet_id,
            Job::RecordHistory { bet_id, .. } => *bet_id,
        }
    }

    fn dedup_job_id(&self) -> String {
        match self {
            Job::SetWinningChoice { bet_id, .. } => keys::resolve_job_id(*bet_id),
            Job::WashBet { bet_id, .. } => keys::wash_job_id(*bet_id),
            Job::RecordHistory { bet_id, .. } => format!("history-{bet_id}-{}", Uuid::new_v4()),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Job::SetWinningChoice { .. } => "set_winning_choice",
            Job::WashBet { .. } => "wash_bet",
            Job::RecordHistory { .. } => "record_history",
        }
    }
}

pub struct ResolutionQueue {
    redis: RedisState,
    db: PgPool,
    concurrency: usize,
    enqueue_script: Script,
    claim_script: Script,
    complete_script: Script,
    retry_script: Script,
    dead_letter_script: Script,
}

impl ResolutionQueue {
    pub fn new(redis: RedisState, db: PgPool, concurrency: usize) -> Self {
        Self {
            redis,
            db,
            concurrency,
            enqueue_script: Script::new(lua_scripts::ENQUEUE_SCRIPT),
            claim_script: Script::new(lua_scripts::CLAIM_SCRIPT),
            complete_script: Script::new(lua_scripts::COMPLETE_SCRIPT),
            retry_script: Script::new(lua_scripts::RETRY_SCRIPT),
            dead_letter_script: Script::new(lua_scripts::DEAD_LETTER_SCRIPT),
        }
    }

    /// Enqueues `job`; a no-op if a job with the same dedup id is already
    /// waiting or in flight (spec §4.G "first-writer-wins").
    pub async fn enqueue(&self, job: Job) -> anyhow::Result<bool> {
        let job_id = job.dedup_job_id();
        let payload = serde_json::to_string(&job)?;
        let now_ms = Utc::now().timestamp_millis();

        let mut conn = self.redis.conn.clone();
        let inserted: i32 = self
            .enqueue_script
            .key(keys::job_key(&job_id))
            .key(keys::waiting_key())
            .arg(&job_id)
            .arg(payload)
            .arg(now_ms)
            .arg(MAX_ATTEMPTS)
            .invoke_async(&mut conn)
            .await?;
        Ok(inserted == 1)
    }

    async fn claim(&self, limit: usize) -> anyhow::Result<Vec<String>> {
        let mut conn = self.redis.conn.clone();
        let now_ms = Utc::now().timestamp_millis();
        let ids: Vec<String> = self
            .claim_script
            .key(keys::waiting_key())
            .key(keys::active_key())
            .arg(now_ms)
            .arg(limit as i64)
            .invoke_async(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn load_job(&self, job_id: &str) -> anyhow::Result<Option<(Job, u32, u32)>> {
        let mut conn = self.redis.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(keys::job_key(job_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let payload = fields.get("payload").cloned().unwrap_or_default();
        let job: Job = serde_json::from_str(&payload)?;
        let attempts_made: u32 = fields.get("attempts_made").and_then(|s| s.parse().ok()).unwrap_or(0);
        let max_attempts: u32 = fields.get("max_attempts").and_then(|s| s.parse().ok()).unwrap_or(MAX_ATTEMPTS);
        Ok(Some((job, attempts_made, max_attempts)))
    }

    async fn complete(&self, job_id: &str) -> anyhow::Result<()> {
        let mut conn = self.redis.conn.clone();
        let now_ms = Utc::now().timestamp_millis();
        let _: i32 = self
            .complete_script
            .key(keys::job_key(job_id))
            .key(keys::active_key())
            .key(keys::completed_key())
            .arg(job_id)
            .arg(now_ms)
            .arg(COMPLETED_RETAIN_COUNT)
            .arg(COMPLETED_RETAIN_MS)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn retry_or_dead_letter(&self, job_id: &str, job: &Job, attempts_made: u32, error: &str) -> anyhow::Result<()> {
        let mut conn = self.redis.conn.clone();
        if attempts_made + 1 < MAX_ATTEMPTS {
            let backoff_ms = BASE_BACKOFF_MS * 2u64.pow(attempts_made);
            let retry_at_ms = Utc::now().timestamp_millis() + backoff_ms as i64;
            let _: i32 = self
                .retry_script
                .key(keys::job_key(job_id))
                .key(keys::active_key())
                .key(keys::waiting_key())
                .arg(job_id)
                .arg(retry_at_ms)
                .invoke_async(&mut conn)
                .await?;
        } else {
            let now_ms = Utc::now().timestamp_millis();
            let _: i32 = self
                .dead_letter_script
                .key(keys::job_key(job_id))
                .key(keys::active_key())
                .key(keys::failed_key())
                .arg(job_id)
                .arg(now_ms)
                .arg(error)
                .invoke_async(&mut conn)
                .await?;
            tracing::error!(
                job_id,
                bet_id = %job.bet_id(),
                job_type = job.type_name(),
                attempts_made = attempts_made + 1,
                error,
                "resolution job exhausted retries, moved to dead letter"
            );
        }
        Ok(())
    }

    async fn execute(&self, job: &Job) -> anyhow::Result<()> {
        match job {
            Job::SetWinningChoice { bet_id, winning_choice, history } => {
                let updated = sqlx::query(
                    "UPDATE bet_proposals SET bet_status = 'resolved', winning_choice = $1, resolution_time = now() \
                     WHERE bet_id = $2 AND bet_status IN ('pending', 'active') AND winning_choice IS NULL",
                )
                .bind(winning_choice)
                .bind(bet_id)
                .execute(&self.db)
                .await?;

                if updated.rows_affected() > 0 {
                    crate::metrics::BET_LIFECYCLE_TRANSITIONS_TOTAL.with_label_values(&["resolved"]).inc();
                    if let Some(history) = history {
                        sqlx::query("INSERT INTO resolution_history (bet_id, event_type, payload) VALUES ($1, $2, $3)")
                            .bind(bet_id)
                            .bind(&history.event_type)
                            .bind(&history.payload)
                            .execute(&self.db)
                            .await?;
                    }
                }
                Ok(())
            }
            Job::WashBet { bet_id, payload, explanation, event_type, mode_label } => {
                let updated = sqlx::query(
                    "UPDATE bet_proposals SET bet_status = 'washed', resolution_time = now() \
                     WHERE bet_id = $1 AND bet_status IN ('pending', 'active') AND winning_choice IS NULL",
                )
                .bind(bet_id)
                .execute(&self.db)
                .await?;
                if updated.rows_affected() > 0 {
                    crate::metrics::BET_LIFECYCLE_TRANSITIONS_TOTAL.with_label_values(&["washed"]).inc();
                }

                let history_payload = serde_json::json!({
                    "explanation": explanation,
                    "mode_label": mode_label,
                    "detail": payload,
                });
                sqlx::query("INSERT INTO resolution_history (bet_id, event_type, payload) VALUES ($1, $2, $3)")
                    .bind(bet_id)
                    .bind(event_type)
                    .bind(&history_payload)
                    .execute(&self.db)
                    .await?;
                Ok(())
            }
            Job::RecordHistory { bet_id, event_type, payload } => {
                sqlx::query("INSERT INTO resolution_history (bet_id, event_type, payload) VALUES ($1, $2, $3)")
                    .bind(bet_id)
                    .bind(event_type)
                    .bind(payload)
                    .execute(&self.db)
                    .await?;
                Ok(())
            }
        }
    }

    /// Queue-depth gauges for `/metrics` / `/health`.
    pub async fn waiting_count(&self) -> anyhow::Result<i64> {
        let mut conn = self.redis.conn.clone();
        Ok(conn.zcard(keys::waiting_key()).await?)
    }

    pub async fn active_count(&self) -> anyhow::Result<i64> {
        let mut conn = self.redis.conn.clone();
        Ok(conn.zcard(keys::active_key()).await?)
    }

    pub async fn failed_count(&self) -> anyhow::Result<i64> {
        let mut conn = self.redis.conn.clone();
        Ok(conn.zcard(keys::failed_key()).await?)
    }

    /// Read-only accessor for failed jobs retained for operator triage
    /// (spec §4.G "operator action is required"). No admin HTTP surface is
    /// exposed for this.
    pub async fn dead_letters(&self) -> anyhow::Result<Vec<DeadLetterJob>> {
        let mut conn = self.redis.conn.clone();
        let job_ids: Vec<String> = conn.zrevrange(keys::failed_key(), 0, 99).await?;
        let mut out = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            let fields: HashMap<String, String> = conn.hgetall(keys::job_key(&job_id)).await?;
            if fields.is_empty() {
                continue;
            }
            let bet_id = fields
                .get("payload")
                .and_then(|p| serde_json::from_str::<Job>(p).ok())
                .map(|j| j.bet_id());
            out.push(DeadLetterJob {
                job_id: job_id.clone(),
                bet_id,
                job_type: fields.get("payload").and_then(|p| serde_json::from_str::<Job>(p).ok()).map(|j| j.type_name().to_string()),
                attempts_made: fields.get("attempts_made").and_then(|s| s.parse().ok()).unwrap_or(0),
                last_error: fields.get("last_error").cloned(),
            });
        }
        Ok(out)
    }

    async fn process_job(self: Arc<Self>, job_id: String) {
        let loaded = match self.load_job(&job_id).await {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(%err, job_id, "failed to load resolution job");
                return;
            }
        };
        let (job, attempts_made, _max_attempts) = loaded;

        match self.execute(&job).await {
            Ok(()) => {
                if let Err(err) = self.complete(&job_id).await {
                    tracing::error!(%err, job_id, "failed to mark resolution job complete");
                }
            }
            Err(err) => {
                if let Err(retry_err) = self.retry_or_dead_letter(&job_id, &job, attempts_made, &err.to_string()).await {
                    tracing::error!(%retry_err, job_id, "failed to schedule resolution job retry");
                }
            }
        }
    }

    /// Starts the bounded-concurrency worker loop. Stops claiming new jobs
    /// once `shutdown` fires, then drains in-flight jobs before returning
    /// (spec §4.G "Startup & shutdown").
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.concurrency));
        let mut in_flight = tokio::task::JoinSet::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let claimed = match self.claim(self.concurrency).await {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::warn!(%err, "failed to claim resolution jobs");
                    Vec::new()
                }
            };

            if claimed.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(CLAIM_POLL_INTERVAL) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }

            for job_id in claimed {
                let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore not closed");
                let queue = Arc::clone(&self);
                in_flight.spawn(async move {
                    queue.process_job(job_id).await;
                    drop(permit);
                });
            }
        }

        tracing::info!("resolution queue draining in-flight jobs before shutdown");
        while in_flight.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_job_id_matches_spec_naming() {
        let bet_id = Uuid::new_v4();
        let job = Job::SetWinningChoice { bet_id, winning_choice: "A".into(), history: None };
        assert_eq!(job.dedup_job_id(), format!("resolve-{bet_id}"));

        let job = Job::WashBet {
            bet_id,
            payload: serde_json::json!({}),
            explanation: "test".into(),
            event_type: "wash".into(),
            mode_label: "u2pick".into(),
        };
        assert_eq!(job.dedup_job_id(), format!("wash-{bet_id}"));
    }
}
