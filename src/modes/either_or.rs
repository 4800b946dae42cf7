//! `either_or` — "whichever of two players finishes with the higher stat
//! delta by a given period wins" (spec §4.H example).

use super::types::{SupportedLeagues, ValidationOutcome, ValidatorOutcome, WizardChoice, WizardStep};
use super::{LiveInfoField, ModeModule, NO_ENTRY_CHOICE};
use crate::db::models::BetProposal;
use crate::live_data::{LiveDataStore, STATUS_FINAL};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Open Question (spec §9): tie handling is unspecified in the source.
/// This mode washes on ties — a strict winner is required to resolve.
const TIE_POLICY_WASH: bool = true;

pub struct EitherOrMode;

fn field_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

fn field_i64(config: &Value, key: &str) -> Option<i64> {
    config.get(key).and_then(Value::as_i64)
}

/// Projects every roster player across both teams into wizard choices so
/// `player1`/`player2` can actually be completed.
async fn player_choices(live_data: &LiveDataStore, game_id: &str) -> Vec<WizardChoice> {
    let Some(doc) = live_data.get_game(game_id).await else {
        return vec![];
    };
    doc.teams
        .iter()
        .flat_map(|team| team.players.iter())
        .map(|player| WizardChoice {
            id: player.id.clone(),
            label: player.name.clone().unwrap_or_else(|| player.id.clone()),
            clears: vec![],
        })
        .collect()
}

#[async_trait]
impl ModeModule for EitherOrMode {
    fn key(&self) -> &'static str {
        "either_or"
    }

    fn supported_leagues(&self) -> SupportedLeagues {
        SupportedLeagues::set(&["NFL", "NBA"])
    }

    fn label(&self) -> &'static str {
        "Either/Or"
    }

    fn overview(&self) -> &'static str {
        "Pick which of two players finishes ahead on a chosen stat by a chosen point in the game."
    }

    fn compute_options(&self, config: &Value) -> Vec<String> {
        let mut options = Vec::new();
        if let Some(p1) = field_str(config, "player1_id") {
            options.push(p1.to_string());
        }
        if let Some(p2) = field_str(config, "player2_id") {
            options.push(p2.to_string());
        }
        options.push(NO_ENTRY_CHOICE.to_string());
        options
    }

    fn compute_winning_condition(&self, config: &Value) -> String {
        let stat = field_str(config, "stat").unwrap_or("the chosen stat");
        let resolve_at = field_i64(config, "resolve_at").unwrap_or(0);
        format!("Whichever player has the larger increase in {stat} by the end of period {resolve_at} wins.")
    }

    async fn build_user_config(
        &self,
        live_data: &LiveDataStore,
        _league: &str,
        league_game_id: Option<&str>,
    ) -> Vec<WizardStep> {
        let roster_choices = match league_game_id {
            Some(game_id) => player_choices(live_data, game_id).await,
            None => vec![],
        };

        vec![
            WizardStep {
                key: "player1".to_string(),
                choices: roster_choices.clone(),
                selected_choice_id: None,
                completed: false,
            },
            WizardStep {
                key: "player2".to_string(),
                choices: roster_choices,
                selected_choice_id: None,
                completed: false,
            },
            WizardStep {
                key: "stat".to_string(),
                choices: vec![
                    WizardChoice { id: "receivingYards".to_string(), label: "Receiving Yards".to_string(), clears: vec![] },
                    WizardChoice { id: "rushingYards".to_string(), label: "Rushing Yards".to_string(), clears: vec![] },
                    WizardChoice { id: "points".to_string(), label: "Points".to_string(), clears: vec![] },
                ],
                selected_choice_id: None,
                completed: false,
            },
            WizardStep {
                key: "resolve_at".to_string(),
                choices: vec![
                    WizardChoice { id: "1".to_string(), label: "End of Q1".to_string(), clears: vec![] },
                    WizardChoice { id: "2".to_string(), label: "End of Q2".to_string(), clears: vec![] },
                    WizardChoice { id: "3".to_string(), label: "End of Q3".to_string(), clears: vec![] },
                ],
                selected_choice_id: None,
                completed: false,
            },
        ]
    }

    /// The `player1`/`player2`/`stat`/`resolve_at` steps select a roster
    /// player id and a period number, but the resolver and baseline capture
    /// read `player1_id`/`player2_id`/`resolve_at` (as an integer) — map the
    /// wizard's choice ids onto those field names here.
    fn config_from_steps(&self, steps: &[WizardStep]) -> Value {
        let selected = |key: &str| steps.iter().find(|s| s.key == key).and_then(|s| s.selected_choice_id.clone());

        let mut map = serde_json::Map::new();
        if let Some(player1) = selected("player1") {
            map.insert("player1_id".to_string(), Value::String(player1));
        }
        if let Some(player2) = selected("player2") {
            map.insert("player2_id".to_string(), Value::String(player2));
        }
        if let Some(stat) = selected("stat") {
            map.insert("stat".to_string(), Value::String(stat));
        }
        if let Some(resolve_at) = selected("resolve_at").and_then(|s| s.parse::<i64>().ok()) {
            map.insert("resolve_at".to_string(), Value::from(resolve_at));
        }
        Value::Object(map)
    }

    fn validate_proposal(&self, config: &Value) -> ValidationOutcome {
        let p1 = field_str(config, "player1_id");
        let p2 = field_str(config, "player2_id");
        let stat = field_str(config, "stat");
        let resolve_at = field_i64(config, "resolve_at");

        match (p1, p2, stat, resolve_at) {
            (Some(p1), Some(p2), _, _) if p1 == p2 => ValidationOutcome::error("player1 and player2 must differ"),
            (Some(_), Some(_), Some(stat), Some(resolve_at)) if !stat.is_empty() && resolve_at >= 1 => {
                ValidationOutcome::ok(None)
            }
            _ => ValidationOutcome::error("either_or requires player1_id, player2_id, stat, and resolve_at"),
        }
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
        config: &Value,
    ) -> anyhow::Result<Value> {
        let game_id = bet
            .league_game_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("either_or requires league_game_id"))?;
        let player1_id = field_str(config, "player1_id").ok_or_else(|| anyhow::anyhow!("missing player1_id"))?;
        let player2_id = field_str(config, "player2_id").ok_or_else(|| anyhow::anyhow!("missing player2_id"))?;
        let stat = field_str(config, "stat").ok_or_else(|| anyhow::anyhow!("missing stat"))?;
        let resolve_at = field_i64(config, "resolve_at").unwrap_or(0);

        let stat1 = live_data.get_player_stat(game_id, player1_id, "default", stat).await;
        let stat2 = live_data.get_player_stat(game_id, player2_id, "default", stat).await;

        Ok(json!({
            "gameId": game_id,
            "player1Stat0": stat1.unwrap_or(Value::from(0)),
            "player2Stat0": stat2.unwrap_or(Value::from(0)),
            "resolveAtPeriod": resolve_at,
            "capturedAt": chrono::Utc::now(),
        }))
    }

    async fn get_live_info(
        &self,
        live_data: &LiveDataStore,
        bet: &BetProposal,
        config: &Value,
        baseline: &Value,
    ) -> Vec<LiveInfoField> {
        let Some(game_id) = bet.league_game_id.as_deref() else {
            return vec![];
        };
        let Some(player1_id) = field_str(config, "player1_id") else { return vec![] };
        let Some(player2_id) = field_str(config, "player2_id") else { return vec![] };
        let Some(stat) = field_str(config, "stat") else { return vec![] };

        let now1 = live_data.get_player_stat(game_id, player1_id, "default", stat).await;
        let now2 = live_data.get_player_stat(game_id, player2_id, "default", stat).await;
        let base1 = baseline.get("player1Stat0").cloned().unwrap_or(Value::from(0));
        let base2 = baseline.get("player2Stat0").cloned().unwrap_or(Value::from(0));

        vec![
            LiveInfoField { label: "player1_current".to_string(), value: now1.unwrap_or(Value::Null) },
            LiveInfoField { label: "player2_current".to_string(), value: now2.unwrap_or(Value::Null) },
            LiveInfoField { label: "player1_baseline".to_string(), value: base1 },
            LiveInfoField { label: "player2_baseline".to_string(), value: base2 },
        ]
    }

    async fn validate_bet(
        &self,
        live_data: &LiveDataStore,
        bet: &BetProposal,
        config: &Value,
        baseline: &Value,
    ) -> ValidatorOutcome {
        let Some(game_id) = bet.league_game_id.as_deref() else {
            return ValidatorOutcome::Wash { explanation: "bet has no league_game_id".to_string() };
        };
        let Some(doc) = live_data.get_game(game_id).await else {
            return ValidatorOutcome::StillRunning;
        };

        let resolve_at = baseline.get("resolveAtPeriod").and_then(Value::as_i64).unwrap_or(i64::MAX);

        let reached = doc.period.map(|p| p as i64 >= resolve_at).unwrap_or(false);
        if !reached {
            if doc.status == STATUS_FINAL {
                return ValidatorOutcome::Wash { explanation: "resolve condition never reached".to_string() };
            }
            return ValidatorOutcome::StillRunning;
        }

        let Some(player1_id) = field_str(config, "player1_id") else {
            return ValidatorOutcome::Wash { explanation: "missing player1_id".to_string() };
        };
        let Some(player2_id) = field_str(config, "player2_id") else {
            return ValidatorOutcome::Wash { explanation: "missing player2_id".to_string() };
        };
        let Some(stat) = field_str(config, "stat") else {
            return ValidatorOutcome::Wash { explanation: "missing stat".to_string() };
        };

        let now1 = as_f64(live_data.get_player_stat(game_id, player1_id, "default", stat).await);
        let now2 = as_f64(live_data.get_player_stat(game_id, player2_id, "default", stat).await);
        let base1 = as_f64(baseline.get("player1Stat0").cloned());
        let base2 = as_f64(baseline.get("player2Stat0").cloned());

        let delta1 = now1 - base1;
        let delta2 = now2 - base2;

        if delta1 > delta2 {
            ValidatorOutcome::Resolve { winning_choice: player1_id.to_string() }
        } else if delta2 > delta1 {
            ValidatorOutcome::Resolve { winning_choice: player2_id.to_string() }
        } else if TIE_POLICY_WASH {
            ValidatorOutcome::Wash { explanation: "tied deltas at resolve period".to_string() }
        } else {
            ValidatorOutcome::StillRunning
        }
    }
}

fn as_f64(value: Option<Value>) -> f64 {
    value
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_identical_players() {
        let mode = EitherOrMode;
        let config = json!({"player1_id": "P1", "player2_id": "P1", "stat": "receivingYards", "resolve_at": 2});
        let outcome = mode.validate_proposal(&config);
        assert!(!outcome.valid);
    }

    #[test]
    fn accepts_well_formed_config() {
        let mode = EitherOrMode;
        let config = json!({"player1_id": "P1", "player2_id": "P2", "stat": "receivingYards", "resolve_at": 2});
        let outcome = mode.validate_proposal(&config);
        assert!(outcome.valid);
    }

    #[test]
    fn options_include_no_entry_sentinel() {
        let mode = EitherOrMode;
        let config = json!({"player1_id": "P1", "player2_id": "P2"});
        let options = mode.compute_options(&config);
        assert!(options.contains(&NO_ENTRY_CHOICE.to_string()));
    }

    fn test_store() -> LiveDataStore {
        use crate::live_data::provider::{BreakerGuardedClient, HttpProviderClient};
        use std::sync::Arc;

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

    fn seeded_game() -> crate::live_data::types::RefinedGameDoc {
        use crate::live_data::types::{PlayerDoc, TeamDoc};

        crate::live_data::types::RefinedGameDoc {
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

    #[tokio::test]
    async fn build_user_config_projects_roster_into_player_choices() {
        let store = test_store();
        store.seed_game("NFL", seeded_game());
        let mode = EitherOrMode;

        let steps = mode.build_user_config(&store, "NFL", Some("G1")).await;
        let player1 = steps.iter().find(|s| s.key == "player1").expect("player1 step");
        let ids: Vec<_> = player1.choices.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2"]);
    }

    #[tokio::test]
    async fn wizard_steps_drive_a_committable_proposal() {
        let store = test_store();
        store.seed_game("NFL", seeded_game());
        let mode = EitherOrMode;

        let mut steps = mode.build_user_config(&store, "NFL", Some("G1")).await;
        for (key, choice_id) in [("player1", "P1"), ("player2", "P2"), ("stat", "receivingYards"), ("resolve_at", "2")] {
            let step = steps.iter_mut().find(|s| s.key == key).expect("step exists");
            assert!(step.choices.iter().any(|c| c.id == choice_id), "{key} missing choice {choice_id}");
            step.selected_choice_id = Some(choice_id.to_string());
            step.completed = true;
        }

        let config = mode.config_from_steps(&steps);
        assert_eq!(config["player1_id"], "P1");
        assert_eq!(config["player2_id"], "P2");
        assert_eq!(config["stat"], "receivingYards");
        assert_eq!(config["resolve_at"], 2);

        let outcome = mode.validate_proposal(&config);
        assert!(outcome.valid, "wizard-built config should pass validation: {:?}", outcome.error);

        let now = chrono::Utc::now();
        let bet = BetProposal {
            bet_id: uuid::Uuid::new_v4(),
            table_id: uuid::Uuid::new_v4(),
            proposer_user_id: uuid::Uuid::new_v4(),
            league: "NFL".to_string(),
            league_game_id: Some("G1".to_string()),
            mode_key: mode.key().to_string(),
            description: "Player One vs Player Two, receiving yards".to_string(),
            wager_amount: rust_decimal::Decimal::new(500, 2),
            time_limit_seconds: 300,
            proposal_time: now,
            close_time: now,
            bet_status: crate::db::models::BetStatus::Active,
            winning_choice: None,
            resolution_time: None,
            origin_bet_id: None,
        };
        let baseline = mode.capture_baseline(&store, &bet, &config).await.expect("baseline captures");
        assert_eq!(baseline["gameId"], "G1");
    }
}
