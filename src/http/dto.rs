//! Request/response bodies for the stable HTTP API (spec §6.1).

use crate::error::{AppError, AppResult, FieldError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

/// Runs `validator`-derived struct validation and maps failures onto the
/// §7 `VALIDATION_ERROR` shape.
pub fn validate_body(body: &impl Validate) -> AppResult<()> {
    body.validate().map_err(|errors| {
        let details = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.into_iter().map(move |e| FieldError {
                    field: field.to_string(),
                    message: e.message.clone().map(|m| m.to_string()).unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        AppError::Validation(details)
    })
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1))]
    pub mode_key: String,
    #[validate(length(min = 1))]
    pub league: String,
    pub league_game_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyChoiceRequest {
    #[validate(length(min = 1))]
    pub step_key: String,
    #[validate(length(min = 1))]
    pub choice_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetGeneralRequest {
    pub wager_amount: Option<Decimal>,
    pub time_limit_seconds: Option<i32>,
}

/// Body of `POST /tables/:tableId/bets`. Either `config_session_id` is set
/// (the wizard path), or the raw-body fields are — spec §4.E step 3.
#[derive(Debug, Deserialize)]
pub struct CreateBetRequest {
    pub config_session_id: Option<Uuid>,
    pub mode_key: Option<String>,
    pub league: Option<String>,
    pub league_game_id: Option<String>,
    pub mode_config: Option<Value>,
    pub wager_amount: Option<Decimal>,
    pub time_limit_seconds: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateBetRequest {
    #[validate(length(min = 1))]
    pub winning_choice: String,
}

#[derive(Debug, Deserialize)]
pub struct TicketsQuery {
    pub limit: Option<i64>,
    pub before_participated_at: Option<DateTime<Utc>>,
    pub before_participation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct TablesQuery {
    pub limit: Option<i64>,
    pub before_activity_at: Option<DateTime<Utc>>,
    pub before_table_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BetProposalResponse {
    pub bet_id: Uuid,
    pub table_id: Uuid,
    pub league: String,
    pub league_game_id: Option<String>,
    pub mode_key: String,
    pub description: String,
    pub wager_amount: Decimal,
    pub time_limit_seconds: i32,
    pub proposal_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub bet_status: String,
    pub winning_choice: Option<String>,
    pub resolution_time: Option<DateTime<Utc>>,
}

impl From<crate::db::models::BetProposal> for BetProposalResponse {
    fn from(bet: crate::db::models::BetProposal) -> Self {
        Self {
            bet_id: bet.bet_id,
            table_id: bet.table_id,
            league: bet.league,
            league_game_id: bet.league_game_id,
            mode_key: bet.mode_key,
            description: bet.description,
            wager_amount: bet.wager_amount,
            time_limit_seconds: bet.time_limit_seconds,
            proposal_time: bet.proposal_time,
            close_time: bet.close_time,
            bet_status: bet.bet_status.as_str().to_string(),
            winning_choice: bet.winning_choice,
            resolution_time: bet.resolution_time,
        }
    }
}
