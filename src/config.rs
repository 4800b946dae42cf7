use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Per-league tuning for the live data ingest loop (spec §6.2, §4.A).
#[derive(Debug, Clone)]
pub struct LeagueIngestConfig {
    pub interval: Duration,
    pub jitter_percent: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub redis_url: String,
    pub database_url: String,
    pub cors_allowed_origins: Vec<String>,
    pub resolution_queue_concurrency: usize,
    pub bet_lifecycle_catchup_ms: i64,
    pub bet_lifecycle_poll_interval_ms: u64,
    pub leagues: HashMap<String, LeagueIngestConfig>,
    pub live_data_provider_base_url: String,
    pub active_leagues: Vec<String>,
}

const DEFAULT_INTERVAL_SECONDS: u64 = 20;
const DEFAULT_JITTER_PERCENT: u32 = 10;

impl Config {
    pub fn from_env() -> Result<Self> {
        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "5001".to_string())
            .parse()
            .context("PORT must be a valid port number")?;

        let redis_url =
            std::env::var("REDIS_URL").context("REDIS_URL must be set")?;

        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("DB_URL"))
            .context("DATABASE_URL (or DB_URL) must be set")?;

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let resolution_queue_concurrency: usize = std::env::var("RESOLUTION_QUEUE_CONCURRENCY")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("RESOLUTION_QUEUE_CONCURRENCY must be a valid number")?;

        let bet_lifecycle_catchup_ms: i64 = std::env::var("BET_LIFECYCLE_CATCHUP_MS")
            .unwrap_or_else(|_| "60000".to_string())
            .parse()
            .context("BET_LIFECYCLE_CATCHUP_MS must be a valid number")?;
        if bet_lifecycle_catchup_ms < 30_000 {
            anyhow::bail!("BET_LIFECYCLE_CATCHUP_MS must be >= 30000");
        }

        let bet_lifecycle_poll_interval_ms: u64 = std::env::var("BET_LIFECYCLE_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .context("BET_LIFECYCLE_POLL_INTERVAL_MS must be a valid number")?;

        let leagues = Self::parse_league_ingest_config()?;

        let live_data_provider_base_url = std::env::var("LIVE_DATA_PROVIDER_BASE_URL")
            .unwrap_or_else(|_| "https://site.api.espn.com/apis/site/v2/sports/football".to_string());

        let active_leagues = std::env::var("ACTIVE_LEAGUES")
            .unwrap_or_else(|_| "NFL".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            bind_address: format!("0.0.0.0:{port}"),
            redis_url,
            database_url,
            cors_allowed_origins,
            resolution_queue_concurrency,
            bet_lifecycle_catchup_ms,
            bet_lifecycle_poll_interval_ms,
            leagues,
            live_data_provider_base_url,
            active_leagues,
        })
    }

    /// Scans the environment for `<LEAGUE>_DATA_INTERVAL_SECONDS` and
    /// `<LEAGUE>_DATA_RAW_JITTER_PERCENT` pairs. A league with no explicit
    /// keys still gets a default entry lazily when first requested via
    /// `league_ingest_config`.
    fn parse_league_ingest_config() -> Result<HashMap<String, LeagueIngestConfig>> {
        let mut intervals: HashMap<String, u64> = HashMap::new();
        let mut jitters: HashMap<String, u32> = HashMap::new();

        for (key, value) in std::env::vars() {
            if let Some(league) = key.strip_suffix("_DATA_INTERVAL_SECONDS") {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("{key} must be a valid number"))?;
                if secs < 12 {
                    anyhow::bail!("{key} must be >= 12");
                }
                intervals.insert(league.to_string(), secs);
            } else if let Some(league) = key.strip_suffix("_DATA_RAW_JITTER_PERCENT") {
                let pct: u32 = value
                    .parse()
                    .with_context(|| format!("{key} must be a valid number"))?;
                if pct < 5 {
                    anyhow::bail!("{key} must be >= 5");
                }
                jitters.insert(league.to_string(), pct);
            }
        }

        let mut leagues = HashMap::new();
        let mut all_keys: Vec<String> = intervals.keys().chain(jitters.keys()).cloned().collect();
        all_keys.sort();
        all_keys.dedup();
        for league in all_keys {
            let interval_secs = *intervals.get(&league).unwrap_or(&DEFAULT_INTERVAL_SECONDS);
            let jitter_percent = *jitters.get(&league).unwrap_or(&DEFAULT_JITTER_PERCENT);
            leagues.insert(
                league,
                LeagueIngestConfig {
                    interval: Duration::from_secs(interval_secs),
                    jitter_percent,
                },
            );
        }
        Ok(leagues)
    }

    /// Returns the ingest tuning for `league`, falling back to defaults if
    /// the operator never set league-specific env vars.
    pub fn league_ingest_config(&self, league: &str) -> LeagueIngestConfig {
        self.leagues.get(league).cloned().unwrap_or(LeagueIngestConfig {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECONDS),
            jitter_percent: DEFAULT_JITTER_PERCENT,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn league_ingest_config_falls_back_to_defaults() {
        let cfg = Config {
            bind_address: "0.0.0.0:5001".into(),
            redis_url: "redis://localhost".into(),
            database_url: "postgres://localhost".into(),
            cors_allowed_origins: vec![],
            resolution_queue_concurrency: 5,
            bet_lifecycle_catchup_ms: 60_000,
            bet_lifecycle_poll_interval_ms: 2000,
            leagues: HashMap::new(),
            live_data_provider_base_url: "https://example.invalid".into(),
            active_leagues: vec!["NFL".into()],
        };
        let nfl = cfg.league_ingest_config("NFL");
        assert_eq!(nfl.interval, Duration::from_secs(DEFAULT_INTERVAL_SECONDS));
        assert_eq!(nfl.jitter_percent, DEFAULT_JITTER_PERCENT);
    }
}
