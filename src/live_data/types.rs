//! §3 RefinedGameDoc — the normalised per-game document the ingest worker
//! produces and every mode resolver reads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderGameState {
    Pre,
    In,
    Post,
}

impl ProviderGameState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderGameState::Pre => "pre",
            ProviderGameState::In => "in",
            ProviderGameState::Post => "post",
        }
    }
}

/// One row of the provider's scoreboard response.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreboardEntry {
    pub game_id: String,
    pub state: ProviderGameState,
}

pub const STATUS_SCHEDULED: &str = "STATUS_SCHEDULED";
pub const STATUS_IN_PROGRESS: &str = "STATUS_IN_PROGRESS";
pub const STATUS_FINAL: &str = "STATUS_FINAL";

/// A single category/key stat bag, e.g. `stats["receiving"]["receivingYards"]`.
pub type StatBag = HashMap<String, HashMap<String, serde_json::Value>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerDoc {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub stats: StatBag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamDoc {
    pub id: String,
    pub abbr: String,
    pub score: i32,
    pub is_home: bool,
    pub has_possession: bool,
    #[serde(default)]
    pub stats: StatBag,
    #[serde(default)]
    pub players: Vec<PlayerDoc>,
}

/// §3 RefinedGameDoc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinedGameDoc {
    pub game_id: String,
    /// One of STATUS_SCHEDULED | STATUS_IN_PROGRESS | STATUS_FINAL.
    pub status: String,
    pub period: Option<i32>,
    pub teams: Vec<TeamDoc>,
    /// League-specific extension payload, opaque to the core.
    #[serde(default)]
    pub extensions: serde_json::Value,
}

impl RefinedGameDoc {
    pub fn team(&self, team_id: &str) -> Option<&TeamDoc> {
        self.teams.iter().find(|t| t.id == team_id)
    }

    pub fn home_team(&self) -> Option<&TeamDoc> {
        self.teams.iter().find(|t| t.is_home)
    }

    pub fn away_team(&self) -> Option<&TeamDoc> {
        self.teams.iter().find(|t| !t.is_home)
    }

    pub fn possession_team_id(&self) -> Option<&str> {
        self.teams
            .iter()
            .find(|t| t.has_possession)
            .map(|t| t.id.as_str())
    }

    pub fn player_stat(&self, player_id: &str, category: &str, key: &str) -> Option<serde_json::Value> {
        self.teams
            .iter()
            .flat_map(|t| t.players.iter())
            .find(|p| p.id == player_id)
            .and_then(|p| p.stats.get(category))
            .and_then(|bag| bag.get(key))
            .cloned()
    }
}
