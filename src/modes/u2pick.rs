//! `u2pick` — a manually-resolved mode with a proposer-defined option list
//! (spec §4.H example). No automatic validator; resolution happens through
//! the `/bets/:betId/validate` endpoint.

use super::types::{SupportedLeagues, ValidationOutcome, WizardChoice, WizardStep};
use super::{LiveInfoField, ModeModule, NO_ENTRY_CHOICE};
use crate::db::models::BetProposal;
use crate::live_data::LiveDataStore;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct U2PickMode;

impl U2PickMode {
    /// The options list recorded in `mode_config`, used by the manual
    /// `/bets/:betId/validate` handler to reject out-of-list choices.
    pub fn valid_options(config: &Value) -> Vec<String> {
        config
            .get("options")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModeModule for U2PickMode {
    fn key(&self) -> &'static str {
        "u2pick"
    }

    fn supported_leagues(&self) -> SupportedLeagues {
        SupportedLeagues::All
    }

    fn label(&self) -> &'static str {
        "U2Pick"
    }

    fn overview(&self) -> &'static str {
        "A proposer-defined option list, resolved manually by a participant or the proposer."
    }

    fn compute_options(&self, config: &Value) -> Vec<String> {
        let mut options = Self::valid_options(config);
        options.push(NO_ENTRY_CHOICE.to_string());
        options
    }

    fn compute_winning_condition(&self, _config: &Value) -> String {
        "A participant or the proposer manually selects the winning option once the outcome is known.".to_string()
    }

    async fn build_user_config(
        &self,
        _live_data: &LiveDataStore,
        _league: &str,
        _league_game_id: Option<&str>,
    ) -> Vec<WizardStep> {
        vec![WizardStep {
            key: "options".to_string(),
            choices: vec![
                WizardChoice { id: "two_way".to_string(), label: "Two options (A / B)".to_string(), clears: vec![] },
                WizardChoice { id: "three_way".to_string(), label: "Three options (A / B / C)".to_string(), clears: vec![] },
            ],
            selected_choice_id: None,
            completed: false,
        }]
    }

    /// The `options` step picks an option-set size, not the options array
    /// `mode_config` expects — expand the chosen preset into the array
    /// `validate_proposal`/`valid_options` read.
    fn config_from_steps(&self, steps: &[WizardStep]) -> Value {
        let preset = steps
            .iter()
            .find(|s| s.key == "options")
            .and_then(|s| s.selected_choice_id.as_deref());

        let options = match preset {
            Some("two_way") => vec!["A".to_string(), "B".to_string()],
            Some("three_way") => vec!["A".to_string(), "B".to_string(), "C".to_string()],
            _ => vec![],
        };

        json!({ "options": options })
    }

    fn validate_proposal(&self, config: &Value) -> ValidationOutcome {
        let options = Self::valid_options(config);
        let mut unique = options.clone();
        unique.sort();
        unique.dedup();
        if options.len() < 2 {
            ValidationOutcome::error("u2pick requires at least two options")
        } else if unique.len() != options.len() {
            ValidationOutcome::error("u2pick options must be unique")
        } else {
            ValidationOutcome::ok(None)
        }
    }

    async fn prepare_config(
        &self,
        _live_data: &LiveDataStore,
        _bet: &BetProposal,
        config: &Value,
    ) -> anyhow::Result<Value> {
        Ok(config.clone())
    }

    async fn capture_baseline(
        &self,
        _live_data: &LiveDataStore,
        _bet: &BetProposal,
        _config: &Value,
    ) -> anyhow::Result<Value> {
        Ok(json!({ "capturedAt": chrono::Utc::now() }))
    }

    async fn get_live_info(
        &self,
        _live_data: &LiveDataStore,
        _bet: &BetProposal,
        config: &Value,
        _baseline: &Value,
    ) -> Vec<LiveInfoField> {
        vec![LiveInfoField {
            label: "options".to_string(),
            value: json!(Self::valid_options(config)),
        }]
    }

    fn has_automatic_validator(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_single_option() {
        let mode = U2PickMode;
        let outcome = mode.validate_proposal(&json!({"options": ["A"]}));
        assert!(!outcome.valid);
    }

    #[test]
    fn rejects_duplicate_options() {
        let mode = U2PickMode;
        let outcome = mode.validate_proposal(&json!({"options": ["A", "A"]}));
        assert!(!outcome.valid);
    }

    #[test]
    fn accepts_two_distinct_options() {
        let mode = U2PickMode;
        let outcome = mode.validate_proposal(&json!({"options": ["A", "B"]}));
        assert!(outcome.valid);
    }

    #[test]
    fn valid_options_reads_config_list() {
        let options = U2PickMode::valid_options(&json!({"options": ["A", "B", "C"]}));
        assert_eq!(options, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
    }

    #[test]
    fn config_from_steps_expands_preset_into_option_array() {
        let mode = U2PickMode;
        let steps = vec![WizardStep {
            key: "options".to_string(),
            choices: vec![],
            selected_choice_id: Some("three_way".to_string()),
            completed: true,
        }];
        let config = mode.config_from_steps(&steps);
        let outcome = mode.validate_proposal(&config);
        assert!(outcome.valid);
        assert_eq!(U2PickMode::valid_options(&config), vec!["A".to_string(), "B".to_string(), "C".to_string()]);
    }
}
