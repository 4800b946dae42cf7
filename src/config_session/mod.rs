//! Config Session Service (spec §4.C) — the stateful multi-step wizard
//! that produces a fully validated, committable bet specification.

use crate::error::{AppError, AppResult, FieldError};
use crate::live_data::LiveDataStore;
use crate::modes::{ModeModule, ModeRegistry, WizardStep};
use crate::redis_state::RedisState;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::AsyncCommands;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const SESSION_TTL_SECONDS: i64 = 15 * 60;
const MIN_WAGER: Decimal = dec!(0.25);
const MAX_WAGER: Decimal = dec!(5.00);
const MIN_TIME_LIMIT: i32 = 10;
const MAX_TIME_LIMIT: i32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    ModeConfig,
    General,
    Summary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub wager_amount: Option<Decimal>,
    pub time_limit_seconds: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSession {
    pub session_id: Uuid,
    pub mode_key: String,
    pub league: String,
    pub league_game_id: Option<String>,
    pub steps: Vec<WizardStep>,
    pub general: GeneralConfig,
    pub status: SessionStatus,
    pub preview: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// The finalised, committable bet specification handed to the Bet
/// Proposal Service.
pub struct CommittedBetSpec {
    pub mode_key: String,
    pub league: String,
    pub league_game_id: Option<String>,
    pub mode_config: Value,
    pub wager_amount: Decimal,
    pub time_limit_seconds: i32,
}

/// Selects `choice_id` for `step_key` and cascades any `clears` onto other
/// steps. Pure and Redis-free so it can be driven directly in tests.
fn apply_choice_to_steps(steps: &mut [WizardStep], step_key: &str, choice_id: &str) -> AppResult<()> {
    let clears = {
        let step = steps
            .iter_mut()
            .find(|s| s.key == step_key)
            .ok_or_else(|| AppError::BadInput(format!("unknown step '{step_key}'")))?;
        let choice = step
            .choices
            .iter()
            .find(|c| c.id == choice_id)
            .cloned()
            .ok_or_else(|| AppError::BadInput(format!("unknown choice '{choice_id}' for step '{step_key}'")))?;
        step.selected_choice_id = Some(choice_id.to_string());
        step.completed = true;
        choice.clears
    };

    for cleared_key in &clears {
        if let Some(cleared_step) = steps.iter_mut().find(|s| &s.key == cleared_key) {
            cleared_step.selected_choice_id = None;
            cleared_step.completed = false;
        }
    }

    Ok(())
}

pub struct ConfigSessionService {
    redis: RedisState,
    modes: Arc<ModeRegistry>,
    live_data: Arc<LiveDataStore>,
}

impl ConfigSessionService {
    pub fn new(redis: RedisState, modes: Arc<ModeRegistry>, live_data: Arc<LiveDataStore>) -> Self {
        Self { redis, modes, live_data }
    }

    fn key(session_id: Uuid) -> String {
        format!("config_session:{session_id}")
    }

    async fn save(&self, session: &ConfigSession) -> AppResult<()> {
        let mut conn = self.redis.conn.clone();
        let key = Self::key(session.session_id);
        let body = serde_json::to_string(session).map_err(|e| AppError::Internal(e.into()))?;
        conn.hset::<_, _, _, ()>(&key, "data", body)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        conn.expire::<_, ()>(&key, SESSION_TTL_SECONDS)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        Ok(())
    }

    async fn delete(&self, session_id: Uuid) -> AppResult<()> {
        let mut conn = self.redis.conn.clone();
        conn.del::<_, ()>(Self::key(session_id)).await.map_err(|e| AppError::Internal(e.into()))?;
        Ok(())
    }

    /// Fails `BAD_INPUT` if the mode is not registered or unsupported for
    /// the league (spec §4.C "createSession" — this operation's error code
    /// takes precedence over the Mode Registry's default MODE_NOT_FOUND /
    /// MODE_UNAVAILABLE_FOR_LEAGUE mapping).
    pub async fn create_session(
        &self,
        mode_key: &str,
        league: &str,
        league_game_id: Option<String>,
    ) -> AppResult<ConfigSession> {
        let module = self
            .modes
            .lookup(league, mode_key)
            .map_err(|_| AppError::BadInput(format!("mode '{mode_key}' is not available for league '{league}'")))?;

        let now = Utc::now();
        let session = ConfigSession {
            session_id: Uuid::new_v4(),
            mode_key: mode_key.to_string(),
            league: league.to_string(),
            league_game_id: league_game_id.clone(),
            steps: module.build_user_config(&self.live_data, league, league_game_id.as_deref()).await,
            general: GeneralConfig::default(),
            status: SessionStatus::ModeConfig,
            preview: None,
            created_at: now,
            expires_at: now + ChronoDuration::seconds(SESSION_TTL_SECONDS),
        };
        self.save(&session).await?;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> AppResult<ConfigSession> {
        let mut conn = self.redis.conn.clone();
        let raw: Option<String> = conn
            .hget(Self::key(session_id), "data")
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        let raw = raw.ok_or_else(|| AppError::NotFound("config session not found".to_string()))?;
        let session: ConfigSession = serde_json::from_str(&raw).map_err(|e| AppError::Internal(e.into()))?;
        if session.expires_at <= Utc::now() {
            return Err(AppError::NotFound("config session not found".to_string()));
        }
        Ok(session)
    }

    pub async fn apply_choice(&self, session_id: Uuid, step_key: &str, choice_id: &str) -> AppResult<ConfigSession> {
        let mut session = self.get_session(session_id).await?;
        let module = self.modes.lookup(&session.league, &session.mode_key)?;

        apply_choice_to_steps(&mut session.steps, step_key, choice_id)?;

        let config = module.config_from_steps(&session.steps);
        let validation = module.validate_proposal(&config);
        session.preview = Some(json!({
            "config": config,
            "valid": validation.valid,
            "error": validation.error,
        }));

        let all_steps_completed = session.steps.iter().all(|s| s.completed);
        if session.status == SessionStatus::ModeConfig && all_steps_completed && validation.valid {
            session.status = SessionStatus::General;
        }

        self.save(&session).await?;
        Ok(session)
    }

    /// Only permitted once `status >= general` (spec §4.C "setGeneral").
    pub async fn set_general(
        &self,
        session_id: Uuid,
        wager_amount: Option<Decimal>,
        time_limit_seconds: Option<i32>,
    ) -> AppResult<ConfigSession> {
        let mut session = self.get_session(session_id).await?;
        if session.status == SessionStatus::ModeConfig {
            return Err(AppError::BadInput("mode configuration is not yet complete".to_string()));
        }

        let mut field_errors = Vec::new();
        if let Some(wager) = wager_amount {
            if wager < MIN_WAGER || wager > MAX_WAGER {
                field_errors.push(FieldError {
                    field: "wager_amount".to_string(),
                    message: format!("must be between {MIN_WAGER} and {MAX_WAGER}"),
                });
            } else {
                session.general.wager_amount = Some(wager);
            }
        }
        if let Some(time_limit) = time_limit_seconds {
            if !(MIN_TIME_LIMIT..=MAX_TIME_LIMIT).contains(&time_limit) {
                field_errors.push(FieldError {
                    field: "time_limit_seconds".to_string(),
                    message: format!("must be between {MIN_TIME_LIMIT} and {MAX_TIME_LIMIT}"),
                });
            } else {
                session.general.time_limit_seconds = Some(time_limit);
            }
        }
        if !field_errors.is_empty() {
            return Err(AppError::Validation(field_errors));
        }

        if session.general.wager_amount.is_some() && session.general.time_limit_seconds.is_some() {
            session.status = SessionStatus::Summary;
        }

        self.save(&session).await?;
        Ok(session)
    }

    /// Verifies `status = summary`, preview errors empty, session not
    /// expired, then destroys the session (spec §4.C "commit").
    pub async fn commit(&self, session_id: Uuid) -> AppResult<CommittedBetSpec> {
        let session = self.get_session(session_id).await?;
        if session.status != SessionStatus::Summary {
            return Err(AppError::Conflict("session is not ready to commit".to_string()));
        }
        let preview = session
            .preview
            .as_ref()
            .ok_or_else(|| AppError::Conflict("session has no preview".to_string()))?;
        let valid = preview.get("valid").and_then(Value::as_bool).unwrap_or(false);
        if !valid {
            return Err(AppError::Conflict("session preview has unresolved errors".to_string()));
        }
        let wager_amount = session
            .general
            .wager_amount
            .ok_or_else(|| AppError::BadInput("wager_amount not set".to_string()))?;
        let time_limit_seconds = session
            .general
            .time_limit_seconds
            .ok_or_else(|| AppError::BadInput("time_limit_seconds not set".to_string()))?;
        let mode_config = preview.get("config").cloned().unwrap_or_else(|| json!({}));

        self.delete(session_id).await?;

        Ok(CommittedBetSpec {
            mode_key: session.mode_key,
            league: session.league,
            league_game_id: session.league_game_id,
            mode_config,
            wager_amount,
            time_limit_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::BetProposal;
    use crate::live_data::provider::{BreakerGuardedClient, HttpProviderClient};
    use crate::live_data::types::{PlayerDoc, RefinedGameDoc, TeamDoc};
    use crate::modes::either_or::EitherOrMode;
    use crate::modes::ModeModule;

    #[test]
    fn apply_choice_to_steps_cascades_clears() {
        let mut steps = vec![
            WizardStep {
                key: "a".into(),
                choices: vec![crate::modes::WizardChoice { id: "x".into(), label: "X".into(), clears: vec!["b".into()] }],
                selected_choice_id: None,
                completed: false,
            },
            WizardStep { key: "b".into(), choices: vec![], selected_choice_id: Some("y".into()), completed: true },
        ];
        apply_choice_to_steps(&mut steps, "a", "x").unwrap();
        assert_eq!(steps[0].selected_choice_id.as_deref(), Some("x"));
        assert!(steps[0].completed);
        assert!(steps[1].selected_choice_id.is_none());
        assert!(!steps[1].completed);
    }

    #[test]
    fn apply_choice_to_steps_rejects_unknown_choice() {
        let mut steps = vec![WizardStep { key: "a".into(), choices: vec![], selected_choice_id: None, completed: false }];
        let result = apply_choice_to_steps(&mut steps, "a", "nope");
        assert!(result.is_err());
    }

    fn test_live_data() -> LiveDataStore {
        let config = crate::config::Config {
            bind_address: "0.0.0.0:5001".into(),
            redis_url: "redis://localhost".into(),
            database_url: "postgres://localhost".into(),
            cors_allowed_origins: vec![],
            resolution_queue_concurrency: 5,
            bet_lifecycle_catchup_ms: 60_000,
            bet_lifecycle_poll_interval_ms: 2000,
            leagues: std::collections::HashMap::new(),
            live_data_provider_base_url: "https://example.invalid".into(),
            active_leagues: vec!["NFL".into()],
        };
        let client = HttpProviderClient::new("https://example.invalid".to_string()).expect("client builds offline");
        LiveDataStore::new(&config, Arc::new(BreakerGuardedClient::new(client)))
    }

    fn seeded_game() -> RefinedGameDoc {
        RefinedGameDoc {
            game_id: "G1".to_string(),
            status: crate::live_data::STATUS_IN_PROGRESS.to_string(),
            period: Some(1),
            teams: vec![
                TeamDoc {
                    id: "HOME".to_string(),
                    abbr: "HOM".to_string(),
                    score: 0,
                    is_home: true,
                    has_possession: true,
                    stats: Default::default(),
                    players: vec![PlayerDoc { id: "P1".to_string(), name: Some("Player One".to_string()), stats: Default::default() }],
                },
                TeamDoc {
                    id: "AWAY".to_string(),
                    abbr: "AWY".to_string(),
                    score: 0,
                    is_home: false,
                    has_possession: false,
                    stats: Default::default(),
                    players: vec![PlayerDoc { id: "P2".to_string(), name: Some("Player Two".to_string()), stats: Default::default() }],
                },
            ],
            extensions: Value::Null,
        }
    }

    /// Drives the wizard step selection, general config, and commit logic
    /// for `either_or` end to end without a live Redis/Postgres connection,
    /// exercising the same `ModeModule` methods the HTTP handlers call.
    #[tokio::test]
    async fn either_or_wizard_flow_produces_a_committable_bet_spec() {
        let live_data = test_live_data();
        live_data.seed_game("NFL", seeded_game());
        let module = EitherOrMode;

        let mut steps = module.build_user_config(&live_data, "NFL", Some("G1")).await;
        for (key, choice_id) in [("player1", "P1"), ("player2", "P2"), ("stat", "receivingYards"), ("resolve_at", "2")] {
            apply_choice_to_steps(&mut steps, key, choice_id).expect("wizard choice applies");
        }
        assert!(steps.iter().all(|s| s.completed));

        let config = module.config_from_steps(&steps);
        let validation = module.validate_proposal(&config);
        assert!(validation.valid, "expected valid proposal, got {:?}", validation.error);

        let wager_amount = dec!(1.00);
        let time_limit_seconds = 60;
        assert!((MIN_WAGER..=MAX_WAGER).contains(&wager_amount));
        assert!((MIN_TIME_LIMIT..=MAX_TIME_LIMIT).contains(&time_limit_seconds));

        let spec = CommittedBetSpec {
            mode_key: module.key().to_string(),
            league: "NFL".to_string(),
            league_game_id: Some("G1".to_string()),
            mode_config: config.clone(),
            wager_amount,
            time_limit_seconds,
        };
        assert_eq!(spec.mode_config["player1_id"], "P1");
        assert_eq!(spec.mode_config["player2_id"], "P2");

        let now = chrono::Utc::now();
        let bet = BetProposal {
            bet_id: Uuid::new_v4(),
            table_id: Uuid::new_v4(),
            proposer_user_id: Uuid::new_v4(),
            league: spec.league.clone(),
            league_game_id: spec.league_game_id.clone(),
            mode_key: spec.mode_key.clone(),
            description: module.compute_winning_condition(&config),
            wager_amount: spec.wager_amount,
            time_limit_seconds: spec.time_limit_seconds,
            proposal_time: now,
            close_time: now,
            bet_status: crate::db::models::BetStatus::Active,
            winning_choice: None,
            resolution_time: None,
            origin_bet_id: None,
        };
        let baseline = module.capture_baseline(&live_data, &bet, &config).await.expect("baseline captures");
        assert_eq!(baseline["gameId"], "G1");
    }
}
