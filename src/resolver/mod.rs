//! Mode Resolvers (spec §4.H) — converts live-data evolution into a
//! terminal decision by polling every active/pending bet whose mode
//! exposes an automatic validator.

use crate::baseline::BaselineStore;
use crate::db::models::{BetProposal, EVENT_TYPE_LIVE_INFO_SNAPSHOT};
use crate::live_data::LiveDataStore;
use crate::mode_config_cache::ModeConfigCache;
use crate::modes::{ModeRegistry, ValidatorOutcome};
use crate::queue::{HistoryEntry, Job, ResolutionQueue};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct ResolverWorker {
    db: PgPool,
    live_data: Arc<LiveDataStore>,
    baselines: Arc<BaselineStore>,
    modes: Arc<ModeRegistry>,
    mode_configs: Arc<ModeConfigCache>,
    queue: Arc<ResolutionQueue>,
}

impl ResolverWorker {
    pub fn new(
        db: PgPool,
        live_data: Arc<LiveDataStore>,
        baselines: Arc<BaselineStore>,
        modes: Arc<ModeRegistry>,
        mode_configs: Arc<ModeConfigCache>,
        queue: Arc<ResolutionQueue>,
    ) -> Self {
        Self { db, live_data, baselines, modes, mode_configs, queue }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            if let Err(err) = self.tick().await {
                tracing::warn!(%err, "mode resolver tick failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!("mode resolver loop stopping at tick boundary");
                    return;
                }
            }
        }
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let bets: Vec<BetProposal> = sqlx::query_as::<_, BetProposal>(
            "SELECT * FROM bet_proposals WHERE bet_status IN ('active', 'pending')",
        )
        .fetch_all(&self.db)
        .await?;

        for bet in bets {
            if let Err(err) = self.evaluate(&bet).await {
                tracing::warn!(%err, bet_id = %bet.bet_id, "failed to evaluate bet for resolution");
            }
        }
        Ok(())
    }

    async fn evaluate(&self, bet: &BetProposal) -> anyhow::Result<()> {
        let Ok(module) = self.modes.lookup(&bet.league, &bet.mode_key) else {
            return Ok(());
        };
        if !module.has_automatic_validator() {
            return Ok(());
        }

        let Some(config) = self.mode_configs.get(&self.db, bet.bet_id).await? else {
            return Ok(());
        };
        let Some(baseline) = self.baselines.get(&bet.mode_key, bet.bet_id).await? else {
            return Ok(());
        };

        match module.validate_bet(&self.live_data, bet, &config, &baseline).await {
            ValidatorOutcome::StillRunning => Ok(()),
            ValidatorOutcome::Resolve { winning_choice } => {
                let live_info = module.get_live_info(&self.live_data, bet, &config, &baseline).await;
                let snapshot = json!({ "fields": live_info });
                self.queue
                    .enqueue(Job::SetWinningChoice {
                        bet_id: bet.bet_id,
                        winning_choice,
                        history: Some(HistoryEntry {
                            event_type: EVENT_TYPE_LIVE_INFO_SNAPSHOT.to_string(),
                            payload: snapshot,
                        }),
                    })
                    .await?;
                self.mode_configs.invalidate(bet.bet_id);
                Ok(())
            }
            ValidatorOutcome::Wash { explanation } => {
                self.queue
                    .enqueue(Job::WashBet {
                        bet_id: bet.bet_id,
                        payload: config.clone(),
                        explanation,
                        event_type: EVENT_TYPE_LIVE_INFO_SNAPSHOT.to_string(),
                        mode_label: module.label().to_string(),
                    })
                    .await?;
                self.mode_configs.invalidate(bet.bet_id);
                Ok(())
            }
        }
    }
}
