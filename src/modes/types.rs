use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// §4.B `supportedLeagues` — either every league (`"*"`) or an explicit set.
#[derive(Debug, Clone)]
pub enum SupportedLeagues {
    All,
    Set(HashSet<String>),
}

impl SupportedLeagues {
    pub fn set(leagues: &[&str]) -> Self {
        SupportedLeagues::Set(leagues.iter().map(|s| s.to_uppercase()).collect())
    }

    pub fn allows(&self, league: &str) -> bool {
        match self {
            SupportedLeagues::All => true,
            SupportedLeagues::Set(set) => set.contains(&league.to_uppercase()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardChoice {
    pub id: String,
    pub label: String,
    /// Step keys cleared when this choice is (re-)selected, per spec
    /// §4.C "may cascade `clears` on dependent steps".
    #[serde(default)]
    pub clears: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardStep {
    pub key: String,
    pub choices: Vec<WizardChoice>,
    pub selected_choice_id: Option<String>,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub error: Option<String>,
    pub config_updates: Option<serde_json::Value>,
}

impl ValidationOutcome {
    pub fn ok(config_updates: Option<serde_json::Value>) -> Self {
        Self { valid: true, error: None, config_updates }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { valid: false, error: Some(message.into()), config_updates: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveInfoField {
    pub label: String,
    pub value: serde_json::Value,
}

/// §4.H — the outcome of one validator tick for one bet.
#[derive(Debug, Clone)]
pub enum ValidatorOutcome {
    StillRunning,
    Resolve { winning_choice: String },
    Wash { explanation: String },
}
