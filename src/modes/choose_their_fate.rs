//! `choose_their_fate` — predicts how the possession team's current drive
//! ends (spec §4.H example).

use super::types::{SupportedLeagues, ValidationOutcome, ValidatorOutcome, WizardChoice, WizardStep};
use super::{LiveInfoField, ModeModule, NO_ENTRY_CHOICE};
use crate::db::models::BetProposal;
use crate::live_data::{LiveDataStore, STATUS_FINAL};
use async_trait::async_trait;
use serde_json::{json, Value};

const OUTCOMES: &[&str] = &["Touchdown", "Field Goal", "Safety", "Punt", "Turnover"];

pub struct ChooseTheirFateMode;

/// Maps a raw provider play-type string to one of [`OUTCOMES`]. Unmatched
/// play types (timeouts, penalties mid-drive) are not drive-ending and
/// should never reach this function.
fn map_play_type(raw: &str) -> Option<&'static str> {
    let lower = raw.to_lowercase();
    if lower.contains("touchdown") {
        Some("Touchdown")
    } else if lower.contains("field goal") {
        Some("Field Goal")
    } else if lower.contains("safety") {
        Some("Safety")
    } else if lower.contains("punt") {
        Some("Punt")
    } else if lower.contains("interception") || lower.contains("fumble") || lower.contains("turnover") || lower.contains("downs") {
        Some("Turnover")
    } else {
        None
    }
}

#[async_trait]
impl ModeModule for ChooseTheirFateMode {
    fn key(&self) -> &'static str {
        "choose_their_fate"
    }

    fn supported_leagues(&self) -> SupportedLeagues {
        SupportedLeagues::set(&["NFL"])
    }

    fn label(&self) -> &'static str {
        "Choose Their Fate"
    }

    fn overview(&self) -> &'static str {
        "Predict how the team currently on offense ends this drive."
    }

    fn compute_options(&self, _config: &Value) -> Vec<String> {
        let mut options: Vec<String> = OUTCOMES.iter().map(|s| s.to_string()).collect();
        options.push(NO_ENTRY_CHOICE.to_string());
        options
    }

    fn compute_winning_condition(&self, _config: &Value) -> String {
        "Whichever outcome ends the possession team's current drive wins.".to_string()
    }

    async fn build_user_config(
        &self,
        _live_data: &LiveDataStore,
        _league: &str,
        _league_game_id: Option<&str>,
    ) -> Vec<WizardStep> {
        vec![WizardStep {
            key: "acknowledge".to_string(),
            choices: vec![WizardChoice {
                id: "ack".to_string(),
                label: "I understand the drive outcome is captured at commit time".to_string(),
                clears: vec![],
            }],
            selected_choice_id: None,
            completed: false,
        }]
    }

    fn requires_in_progress(&self) -> bool {
        true
    }

    fn validate_proposal(&self, _config: &Value) -> ValidationOutcome {
        ValidationOutcome::ok(None)
    }

    async fn prepare_config(
        &self,
        live_data: &LiveDataStore,
        bet: &BetProposal,
        config: &Value,
    ) -> anyhow::Result<Value> {
        let baseline = self.capture_baseline(live_data, bet, config).await?;
        let mut enriched = config.clone();
        if let Value::Object(ref mut map) = enriched {
            map.insert("baseline".to_string(), baseline);
        }
        Ok(enriched)
    }

    async fn capture_baseline(
        &self,
        live_data: &LiveDataStore,
        bet: &BetProposal,
        _config: &Value,
    ) -> anyhow::Result<Value> {
        let game_id = bet
            .league_game_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("choose_their_fate requires league_game_id"))?;
        let doc = live_data
            .get_game(game_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("no live document for game {game_id}"))?;
        let possession_team_id = doc.possession_team_id().map(str::to_string);

        Ok(json!({
            "gameId": game_id,
            "possessionTeamId": possession_team_id,
            "capturedAt": chrono::Utc::now(),
        }))
    }

    async fn get_live_info(
        &self,
        live_data: &LiveDataStore,
        bet: &BetProposal,
        _config: &Value,
        baseline: &Value,
    ) -> Vec<LiveInfoField> {
        let Some(game_id) = bet.league_game_id.as_deref() else { return vec![] };
        let Some(doc) = live_data.get_game(game_id).await else { return vec![] };
        let possession_now = doc.possession_team_id().map(str::to_string);
        let possession_baseline = baseline.get("possessionTeamId").cloned().unwrap_or(Value::Null);

        vec![
            LiveInfoField { label: "possession_team_now".to_string(), value: possession_now.map(Value::String).unwrap_or(Value::Null) },
            LiveInfoField { label: "possession_team_baseline".to_string(), value: possession_baseline },
        ]
    }

    async fn validate_bet(
        &self,
        live_data: &LiveDataStore,
        bet: &BetProposal,
        _config: &Value,
        baseline: &Value,
    ) -> ValidatorOutcome {
        let Some(game_id) = bet.league_game_id.as_deref() else {
            return ValidatorOutcome::Wash { explanation: "bet has no league_game_id".to_string() };
        };
        let Some(doc) = live_data.get_game(game_id).await else {
            return ValidatorOutcome::StillRunning;
        };
        let Some(possession_team_id) = baseline.get("possessionTeamId").and_then(Value::as_str) else {
            return ValidatorOutcome::Wash { explanation: "no possession team captured at baseline".to_string() };
        };

        let drive_results = doc.extensions.get("driveResults").and_then(Value::as_array);
        if let Some(drives) = drive_results {
            for drive in drives {
                let team_id = drive.get("teamId").and_then(Value::as_str);
                let play_type = drive.get("playType").and_then(Value::as_str);
                if team_id == Some(possession_team_id) {
                    if let Some(outcome) = play_type.and_then(map_play_type) {
                        return ValidatorOutcome::Resolve { winning_choice: outcome.to_string() };
                    }
                }
            }
        }

        if doc.status == STATUS_FINAL {
            return ValidatorOutcome::Wash { explanation: "possession never ended before game end".to_string() };
        }

        ValidatorOutcome::StillRunning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_play_types() {
        assert_eq!(map_play_type("Touchdown pass to..."), Some("Touchdown"));
        assert_eq!(map_play_type("John Doe punts 45 yards"), Some("Punt"));
        assert_eq!(map_play_type("Jane Doe intercepted by..."), Some("Turnover"));
        assert_eq!(map_play_type("Timeout #2 by Home Team"), None);
    }

    #[test]
    fn options_include_every_outcome_and_no_entry() {
        let mode = ChooseTheirFateMode;
        let options = mode.compute_options(&json!({}));
        for outcome in OUTCOMES {
            assert!(options.contains(&outcome.to_string()));
        }
        assert!(options.contains(&NO_ENTRY_CHOICE.to_string()));
    }
}
