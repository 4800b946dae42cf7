use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

/// §3 BetProposal.bet_status — the only legal transitions are
/// `active -> pending -> {resolved, washed}` (never retrograde).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Active,
    Pending,
    Resolved,
    Washed,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Active => "active",
            BetStatus::Pending => "pending",
            BetStatus::Resolved => "resolved",
            BetStatus::Washed => "washed",
        }
    }

    /// True once this status is a settled terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BetStatus::Resolved | BetStatus::Washed)
    }
}

impl std::str::FromStr for BetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(BetStatus::Active),
            "pending" => Ok(BetStatus::Pending),
            "resolved" => Ok(BetStatus::Resolved),
            "washed" => Ok(BetStatus::Washed),
            other => anyhow::bail!("unknown bet_status: {other}"),
        }
    }
}

impl std::fmt::Display for BetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// §3 BetProposal — the authoritative record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetProposal {
    pub bet_id: Uuid,
    pub table_id: Uuid,
    pub proposer_user_id: Uuid,
    pub league: String,
    pub league_game_id: Option<String>,
    pub mode_key: String,
    pub description: String,
    pub wager_amount: Decimal,
    pub time_limit_seconds: i32,
    pub proposal_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub bet_status: BetStatus,
    pub winning_choice: Option<String>,
    pub resolution_time: Option<DateTime<Utc>>,
    pub origin_bet_id: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for BetProposal {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let status_str: String = row.try_get("bet_status")?;
        let bet_status = status_str
            .parse::<BetStatus>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        Ok(BetProposal {
            bet_id: row.try_get("bet_id")?,
            table_id: row.try_get("table_id")?,
            proposer_user_id: row.try_get("proposer_user_id")?,
            league: row.try_get("league")?,
            league_game_id: row.try_get("league_game_id")?,
            mode_key: row.try_get("mode_key")?,
            description: row.try_get("description")?,
            wager_amount: row.try_get("wager_amount")?,
            time_limit_seconds: row.try_get("time_limit_seconds")?,
            proposal_time: row.try_get("proposal_time")?,
            close_time: row.try_get("close_time")?,
            bet_status,
            winning_choice: row.try_get("winning_choice")?,
            resolution_time: row.try_get("resolution_time")?,
            origin_bet_id: row.try_get("origin_bet_id")?,
        })
    }
}

/// §3 BetParticipation — one per (bet, user) acceptance.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BetParticipation {
    pub participation_id: Uuid,
    pub bet_id: Uuid,
    pub user_id: Uuid,
    pub user_guess: String,
    pub participation_time: DateTime<Utc>,
}

pub const NO_ENTRY_CHOICE: &str = "No Entry";

/// §3 ResolutionHistoryEvent — append-only audit log per bet, and the
/// persistence channel for `mode_config` / `live_info_snapshot`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ResolutionHistoryEvent {
    pub id: Uuid,
    pub bet_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub const EVENT_TYPE_MODE_CONFIG: &str = "mode_config";
pub const EVENT_TYPE_LIVE_INFO_SNAPSHOT: &str = "live_info_snapshot";

/// §3 Ticket — a read-model projection (participation x bet), no
/// independent lifecycle.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Ticket {
    pub participation_id: Uuid,
    pub bet_id: Uuid,
    pub user_id: Uuid,
    pub user_guess: String,
    pub participation_time: DateTime<Utc>,
    pub table_id: Uuid,
    pub league: String,
    pub mode_key: String,
    pub description: String,
    pub wager_amount: Decimal,
    pub bet_status: String,
    pub winning_choice: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TableSummary {
    pub table_id: Uuid,
    pub name: String,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedItem {
    pub id: Uuid,
    pub table_id: Uuid,
    pub item_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
