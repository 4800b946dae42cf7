//! Bet Proposal Service (spec §4.E) — validates, enriches, and commits a
//! bet atomically; the sole entry point that creates `bet_proposals` rows.

use crate::baseline::BaselineStore;
use crate::config_session::ConfigSessionService;
use crate::db::models::{BetProposal, BetStatus, EVENT_TYPE_MODE_CONFIG};
use crate::error::{AppError, AppResult, FieldError};
use crate::live_data::{LiveDataStore, STATUS_FINAL, STATUS_IN_PROGRESS};
use crate::mode_config_cache::ModeConfigCache;
use crate::modes::ModeRegistry;
use crate::rate_limit::{RateLimitDecision, RateLimitKind, RateLimiter};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const MIN_WAGER: Decimal = dec!(0.25);
const MAX_WAGER: Decimal = dec!(5.00);
const MIN_TIME_LIMIT: i32 = 10;
const MAX_TIME_LIMIT: i32 = 120;

/// Either a config-session reference or a fully specified raw body (spec
/// §4.E step 3: "Resolve session ... or raw-body validation").
pub enum ProposalSource {
    Session { config_session_id: Uuid },
    RawBody {
        mode_key: String,
        league: String,
        league_game_id: Option<String>,
        mode_config: Value,
        wager_amount: Decimal,
        time_limit_seconds: i32,
    },
}

pub struct ProposeBetInput {
    pub table_id: Uuid,
    pub proposer_user_id: Uuid,
    pub source: ProposalSource,
}

fn clamp_wager(wager: Decimal) -> Decimal {
    wager
        .max(MIN_WAGER)
        .min(MAX_WAGER)
        .round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

fn clamp_time_limit(seconds: i32) -> i32 {
    seconds.clamp(MIN_TIME_LIMIT, MAX_TIME_LIMIT)
}

pub struct ProposalService {
    db: PgPool,
    modes: Arc<ModeRegistry>,
    live_data: Arc<LiveDataStore>,
    baselines: Arc<BaselineStore>,
    rate_limiter: Arc<RateLimiter>,
    sessions: Arc<ConfigSessionService>,
    mode_configs: Arc<ModeConfigCache>,
}

impl ProposalService {
    pub fn new(
        db: PgPool,
        modes: Arc<ModeRegistry>,
        live_data: Arc<LiveDataStore>,
        baselines: Arc<BaselineStore>,
        rate_limiter: Arc<RateLimiter>,
        sessions: Arc<ConfigSessionService>,
        mode_configs: Arc<ModeConfigCache>,
    ) -> Self {
        Self { db, modes, live_data, baselines, rate_limiter, sessions, mode_configs }
    }

    /// Runs the full §4.E pipeline (rate-limit check excluded from steps
    /// 1-2, which are handled ahead of this call by the HTTP layer's authn
    /// and the caller below — both live in the same request here since
    /// table-membership is an external collaborator out of this core's
    /// scope per spec §1).
    pub async fn propose(&self, input: ProposeBetInput) -> AppResult<(BetProposal, RateLimitDecision)> {
        let subject = format!("{}:{}", input.proposer_user_id, input.table_id);
        let decision = self.rate_limiter.check(RateLimitKind::Bets, &subject).await;
        if !decision.allowed {
            return Err(AppError::RateLimited {
                retry_after_secs: decision.retry_after_secs.unwrap_or(60),
                limit: decision.limit,
                reset_at: decision.reset_at,
            });
        }

        let (mode_key, league, league_game_id, mode_config, wager_amount, time_limit_seconds) =
            self.resolve_source(input.source).await?;

        let module = self.modes.lookup(&league, &mode_key)?;

        if let Some(game_id) = league_game_id.as_deref() {
            if let Some(status) = self.live_data.get_game_status(game_id).await {
                if status == STATUS_FINAL {
                    return Err(AppError::BadInput("game has already gone final".to_string()));
                }
                if module.requires_in_progress() && status != STATUS_IN_PROGRESS {
                    return Err(AppError::BadInput(format!(
                        "mode '{mode_key}' requires the game to be in progress"
                    )));
                }
            } else if module.requires_in_progress() {
                return Err(AppError::BadInput(format!(
                    "mode '{mode_key}' requires live game data, none available for {game_id}"
                )));
            }
        }

        let validation = module.validate_proposal(&mode_config);
        if !validation.valid {
            return Err(AppError::Validation(vec![FieldError {
                field: "mode_config".to_string(),
                message: validation.error.unwrap_or_else(|| "invalid mode configuration".to_string()),
            }]));
        }
        let mode_config = match validation.config_updates {
            Some(updates) => updates,
            None => mode_config,
        };

        let wager_amount = clamp_wager(wager_amount);
        let time_limit_seconds = clamp_time_limit(time_limit_seconds);
        let description = module.compute_winning_condition(&mode_config);

        let proposal_time = Utc::now();
        let close_time = proposal_time + ChronoDuration::seconds(time_limit_seconds as i64);
        let bet_id = Uuid::new_v4();

        let insert_result = sqlx::query_as::<_, BetProposal>(
            "INSERT INTO bet_proposals \
             (bet_id, table_id, proposer_user_id, league, league_game_id, mode_key, description, \
              wager_amount, time_limit_seconds, proposal_time, close_time, bet_status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'active') \
             RETURNING *",
        )
        .bind(bet_id)
        .bind(input.table_id)
        .bind(input.proposer_user_id)
        .bind(&league)
        .bind(&league_game_id)
        .bind(&mode_key)
        .bind(&description)
        .bind(wager_amount)
        .bind(time_limit_seconds)
        .bind(proposal_time)
        .bind(close_time)
        .fetch_one(&self.db)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

        if let Err(err) = self.enrich_and_persist(&insert_result, &mode_config).await {
            // Compensating delete (spec §4.E step 9, §7 "Baseline-store
            // failures during commit: fatal to that proposal").
            let _ = sqlx::query("DELETE FROM bet_proposals WHERE bet_id = $1")
                .bind(bet_id)
                .execute(&self.db)
                .await;
            return Err(AppError::Internal(err));
        }

        if let Err(err) = self.insert_feed_item(&insert_result).await {
            // Non-fatal: the bet row and its mode_config are already
            // consistent (spec §7 "History insert failures... logged but
            // non-fatal").
            tracing::warn!(%err, bet_id = %bet_id, "failed to insert feed item for proposal");
        }

        Ok((insert_result, decision))
    }

    async fn resolve_source(
        &self,
        source: ProposalSource,
    ) -> AppResult<(String, String, Option<String>, Value, Decimal, i32)> {
        match source {
            ProposalSource::Session { config_session_id } => {
                let spec = self.sessions.commit(config_session_id).await?;
                Ok((
                    spec.mode_key,
                    spec.league,
                    spec.league_game_id,
                    spec.mode_config,
                    spec.wager_amount,
                    spec.time_limit_seconds,
                ))
            }
            ProposalSource::RawBody {
                mode_key,
                league,
                league_game_id,
                mode_config,
                wager_amount,
                time_limit_seconds,
            } => Ok((mode_key, league, league_game_id, mode_config, wager_amount, time_limit_seconds)),
        }
    }

    /// Step 9: enrich config via the mode hook, persist it as a
    /// `mode_config` history event, and capture the baseline. Any failure
    /// here triggers the caller's compensating delete.
    async fn enrich_and_persist(&self, bet: &BetProposal, mode_config: &Value) -> anyhow::Result<()> {
        let module = self
            .modes
            .lookup(&bet.league, &bet.mode_key)
            .map_err(|_| anyhow::anyhow!("mode disappeared from registry mid-commit"))?;

        let enriched = module.prepare_config(&self.live_data, bet, mode_config).await?;

        sqlx::query("INSERT INTO resolution_history (bet_id, event_type, payload) VALUES ($1, $2, $3)")
            .bind(bet.bet_id)
            .bind(EVENT_TYPE_MODE_CONFIG)
            .bind(&enriched)
            .execute(&self.db)
            .await?;

        let baseline = module.capture_baseline(&self.live_data, bet, &enriched).await?;
        self.baselines.put(&bet.mode_key, bet.bet_id, &baseline).await?;

        self.mode_configs.invalidate(bet.bet_id);
        Ok(())
    }

    async fn insert_feed_item(&self, bet: &BetProposal) -> anyhow::Result<()> {
        let payload = json!({
            "bet_id": bet.bet_id,
            "mode_key": bet.mode_key,
            "description": bet.description,
            "wager_amount": bet.wager_amount,
        });
        sqlx::query("INSERT INTO feed_items (table_id, item_type, payload) VALUES ($1, 'bet_proposal', $2)")
            .bind(bet.table_id)
            .bind(&payload)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// `pokeBet` — re-proposes a settled bet (spec §4.E "Poke").
    ///
    /// `origin_bet_id` chain shape: this resolves it as a *flat* reference —
    /// every poke's `origin_bet_id` points at the root proposal of the
    /// chain, not at its immediate predecessor, so a client can always find
    /// "where this bet started" in one lookup.
    pub async fn poke(&self, source_bet_id: Uuid, proposer_user_id: Uuid) -> AppResult<(BetProposal, RateLimitDecision)> {
        let source = sqlx::query_as::<_, BetProposal>("SELECT * FROM bet_proposals WHERE bet_id = $1")
            .bind(source_bet_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| AppError::Internal(e.into()))?
            .ok_or_else(|| AppError::NotFound("source bet not found".to_string()))?;

        if !matches!(source.bet_status, BetStatus::Resolved | BetStatus::Washed) {
            return Err(AppError::BadInput("source bet is not settled".to_string()));
        }

        let mode_config = self
            .mode_configs
            .get(&self.db, source_bet_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("source bet has no mode_config")))?;

        let subject = format!("{}:{}", proposer_user_id, source.table_id);
        let decision = self.rate_limiter.check(RateLimitKind::Bets, &subject).await;
        if !decision.allowed {
            return Err(AppError::RateLimited {
                retry_after_secs: decision.retry_after_secs.unwrap_or(60),
                limit: decision.limit,
                reset_at: decision.reset_at,
            });
        }

        let module = self.modes.lookup(&source.league, &source.mode_key)?;
        let description = module.compute_winning_condition(&mode_config);

        let origin_bet_id = source.origin_bet_id.unwrap_or(source.bet_id);
        let proposal_time = Utc::now();
        let close_time = proposal_time + ChronoDuration::seconds(source.time_limit_seconds as i64);
        let bet_id = Uuid::new_v4();

        let inserted = sqlx::query_as::<_, BetProposal>(
            "INSERT INTO bet_proposals \
             (bet_id, table_id, proposer_user_id, league, league_game_id, mode_key, description, \
              wager_amount, time_limit_seconds, proposal_time, close_time, bet_status, origin_bet_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'active', $12) \
             RETURNING *",
        )
        .bind(bet_id)
        .bind(source.table_id)
        .bind(proposer_user_id)
        .bind(&source.league)
        .bind(&source.league_game_id)
        .bind(&source.mode_key)
        .bind(&description)
        .bind(source.wager_amount)
        .bind(source.time_limit_seconds)
        .bind(proposal_time)
        .bind(close_time)
        .bind(origin_bet_id)
        .fetch_one(&self.db)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

        if let Err(err) = self.enrich_and_persist(&inserted, &mode_config).await {
            let _ = sqlx::query("DELETE FROM bet_proposals WHERE bet_id = $1")
                .bind(bet_id)
                .execute(&self.db)
                .await;
            return Err(AppError::Internal(err));
        }

        if let Err(err) = self.insert_feed_item(&inserted).await {
            tracing::warn!(%err, bet_id = %bet_id, "failed to insert feed item for poked bet");
        }

        Ok((inserted, decision))
    }

    /// Manual U2Pick validation via `/bets/:betId/validate` (spec §4.H).
    pub async fn validate_manual(
        &self,
        queue: &crate::queue::ResolutionQueue,
        bet_id: Uuid,
        winning_choice: &str,
    ) -> AppResult<()> {
        let bet = sqlx::query_as::<_, BetProposal>("SELECT * FROM bet_proposals WHERE bet_id = $1")
            .bind(bet_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| AppError::Internal(e.into()))?
            .ok_or_else(|| AppError::NotFound("bet not found".to_string()))?;

        let module = self.modes.lookup(&bet.league, &bet.mode_key)?;
        if module.has_automatic_validator() {
            return Err(AppError::BadInput("this mode does not support manual validation".to_string()));
        }

        let mode_config = self
            .mode_configs
            .get(&self.db, bet_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("bet has no mode_config")))?;

        let valid_options = crate::modes::u2pick::U2PickMode::valid_options(&mode_config);
        if !valid_options.iter().any(|o| o == winning_choice) {
            return Err(AppError::InvalidChoice {
                winning_choice: winning_choice.to_string(),
                valid_options,
            });
        }

        let baseline = self.baselines.get(&bet.mode_key, bet_id).await.map_err(AppError::Internal)?.unwrap_or(json!({}));
        let live_info = module.get_live_info(&self.live_data, &bet, &mode_config, &baseline).await;

        queue
            .enqueue(crate::queue::Job::SetWinningChoice {
                bet_id,
                winning_choice: winning_choice.to_string(),
                history: Some(crate::queue::HistoryEntry {
                    event_type: crate::db::models::EVENT_TYPE_LIVE_INFO_SNAPSHOT.to_string(),
                    payload: json!({ "fields": live_info }),
                }),
            })
            .await
            .map_err(AppError::Internal)?;
        self.mode_configs.invalidate(bet_id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_wager_rounds_toward_zero_and_clamps_range() {
        assert_eq!(clamp_wager(dec!(0.10)), dec!(0.25));
        assert_eq!(clamp_wager(dec!(10.00)), dec!(5.00));
        assert_eq!(clamp_wager(dec!(1.239)), dec!(1.23));
    }

    #[test]
    fn clamp_time_limit_clamps_to_hard_range() {
        assert_eq!(clamp_time_limit(5), 10);
        assert_eq!(clamp_time_limit(500), 120);
        assert_eq!(clamp_time_limit(60), 60);
    }
}
