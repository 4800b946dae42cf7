//! League-specific refiners: raw provider boxscore JSON -> `RefinedGameDoc`.

use super::types::{PlayerDoc, RefinedGameDoc, TeamDoc, STATUS_FINAL, STATUS_IN_PROGRESS, STATUS_SCHEDULED};
use serde_json::Value;
use std::collections::HashMap;

pub trait Refiner: Send + Sync {
    fn refine(&self, game_id: &str, raw: &Value) -> anyhow::Result<RefinedGameDoc>;
}

/// Refines the common ESPN-shaped boxscore document (`competitions[0]` with
/// `competitors[]` and `boxscore.players[].statistics[]`), used as the
/// default for every registered league unless overridden.
pub struct EspnStyleRefiner;

impl Refiner for EspnStyleRefiner {
    fn refine(&self, game_id: &str, raw: &Value) -> anyhow::Result<RefinedGameDoc> {
        let competition = raw
            .pointer("/header/competitions/0")
            .ok_or_else(|| anyhow::anyhow!("missing header.competitions[0]"))?;

        let status_name = competition
            .pointer("/status/type/name")
            .and_then(Value::as_str)
            .unwrap_or("STATUS_SCHEDULED");
        let status = normalize_status(status_name);
        let period = competition.pointer("/status/period").and_then(Value::as_i64).map(|p| p as i32);

        let competitors = competition
            .get("competitors")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let player_stats_by_team = collect_player_stats(raw);

        let mut teams = Vec::with_capacity(competitors.len());
        for competitor in &competitors {
            let team_id = competitor.pointer("/team/id").and_then(Value::as_str).unwrap_or_default().to_string();
            let abbr = competitor.pointer("/team/abbreviation").and_then(Value::as_str).unwrap_or_default().to_string();
            let score = competitor
                .get("score")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i32>().ok())
                .or_else(|| competitor.get("score").and_then(Value::as_i64).map(|v| v as i32))
                .unwrap_or(0);
            let is_home = competitor.get("homeAway").and_then(Value::as_str) == Some("home");
            let has_possession = competitor.get("possession").and_then(Value::as_bool).unwrap_or(false);

            teams.push(TeamDoc {
                players: player_stats_by_team.get(&team_id).cloned().unwrap_or_default(),
                id: team_id,
                abbr,
                score,
                is_home,
                has_possession,
                stats: HashMap::new(),
            });
        }

        Ok(RefinedGameDoc {
            game_id: game_id.to_string(),
            status,
            period,
            teams,
            extensions: Value::Null,
        })
    }
}

fn normalize_status(espn_status_name: &str) -> String {
    match espn_status_name {
        s if s.contains("FINAL") => STATUS_FINAL.to_string(),
        s if s.contains("IN_PROGRESS") || s.contains("HALFTIME") => STATUS_IN_PROGRESS.to_string(),
        _ => STATUS_SCHEDULED.to_string(),
    }
}

fn collect_player_stats(raw: &Value) -> HashMap<String, Vec<PlayerDoc>> {
    let mut by_team: HashMap<String, Vec<PlayerDoc>> = HashMap::new();

    let Some(groups) = raw.pointer("/boxscore/players").and_then(Value::as_array) else {
        return by_team;
    };

    for group in groups {
        let team_id = group.pointer("/team/id").and_then(Value::as_str).unwrap_or_default().to_string();
        let Some(stat_categories) = group.get("statistics").and_then(Value::as_array) else {
            continue;
        };

        let mut players_by_id: HashMap<String, PlayerDoc> = HashMap::new();

        for category in stat_categories {
            let category_name = category.get("name").and_then(Value::as_str).unwrap_or("general").to_string();
            let keys: Vec<String> = category
                .get("labels")
                .and_then(Value::as_array)
                .map(|labels| labels.iter().filter_map(|l| l.as_str().map(str::to_string)).collect())
                .unwrap_or_default();

            let Some(athletes) = category.get("athletes").and_then(Value::as_array) else {
                continue;
            };

            for athlete in athletes {
                let id = athlete.pointer("/athlete/id").and_then(Value::as_str).unwrap_or_default().to_string();
                if id.is_empty() {
                    continue;
                }
                let name = athlete.pointer("/athlete/displayName").and_then(Value::as_str).map(str::to_string);
                let values: Vec<String> = athlete
                    .get("stats")
                    .and_then(Value::as_array)
                    .map(|vals| vals.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();

                let entry = players_by_id.entry(id.clone()).or_insert_with(|| PlayerDoc {
                    id: id.clone(),
                    name: name.clone(),
                    stats: HashMap::new(),
                });
                if entry.name.is_none() {
                    entry.name = name;
                }

                let bag = entry.stats.entry(category_name.clone()).or_default();
                for (key, value) in keys.iter().zip(values.iter()) {
                    bag.insert(key.clone(), serde_json::Value::String(value.clone()));
                }
            }
        }

        by_team.insert(team_id, players_by_id.into_values().collect());
    }

    by_team
}
