//! Bet Lifecycle Worker (spec §4.F) — clock-driven `active -> pending`
//! transitions with restart recovery. Never sets `winning_choice`;
//! resolution is the Mode Resolvers' responsibility.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct LifecycleWorker {
    db: PgPool,
    poll_interval: Duration,
    catchup_ms: i64,
}

impl LifecycleWorker {
    pub fn new(db: PgPool, poll_interval_ms: u64, catchup_ms: i64) -> Self {
        Self { db, poll_interval: Duration::from_millis(poll_interval_ms), catchup_ms }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        match self.catch_up().await {
            Ok(count) if count > 0 => tracing::info!(count, "lifecycle worker caught up stale active bets on restart"),
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "lifecycle worker catch-up scan failed"),
        }

        loop {
            match self.tick().await {
                Ok(count) if count > 0 => tracing::debug!(count, "lifecycle worker promoted bets to pending"),
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "lifecycle worker tick failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!("lifecycle worker stopping at tick boundary");
                    return;
                }
            }
        }
    }

    /// Promotes every `active` bet whose `close_time <= now` (spec §4.F
    /// "Operation").
    async fn tick(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE bet_proposals SET bet_status = 'pending' \
             WHERE bet_status = 'active' AND close_time <= now() AND winning_choice IS NULL",
        )
        .execute(&self.db)
        .await?;
        let count = result.rows_affected();
        if count > 0 {
            crate::metrics::BET_LIFECYCLE_TRANSITIONS_TOTAL
                .with_label_values(&["pending"])
                .inc_by(count);
        }
        Ok(count)
    }

    /// Promotes every `active` bet whose `close_time` is older than
    /// `BET_LIFECYCLE_CATCHUP_MS` ago (spec §4.F "Catch-up").
    async fn catch_up(&self) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::milliseconds(self.catchup_ms);
        let result = sqlx::query(
            "UPDATE bet_proposals SET bet_status = 'pending' \
             WHERE bet_status = 'active' AND close_time < $1 AND winning_choice IS NULL",
        )
        .bind(cutoff)
        .execute(&self.db)
        .await?;
        let count = result.rows_affected();
        if count > 0 {
            crate::metrics::BET_LIFECYCLE_TRANSITIONS_TOTAL
                .with_label_values(&["pending"])
                .inc_by(count);
        }
        Ok(count)
    }
}
