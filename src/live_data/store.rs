//! The Live Data Store (spec §4.A): ingest loop, atomic file persistence,
//! and the cached read API mode resolvers consult.

use super::provider::{BreakerGuardedClient, HttpProviderClient, ProviderClient};
use super::refine::{EspnStyleRefiner, Refiner};
use super::types::{ProviderGameState, RefinedGameDoc, STATUS_FINAL};
use crate::config::Config;
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const MIN_CACHE_TTL: Duration = Duration::from_secs(5);
const RAW_POST_GRACE: Duration = Duration::from_secs(10 * 60);
const RAW_FINAL_GRACE: Duration = Duration::from_secs(30 * 60);

struct CacheEntry {
    league: String,
    doc: RefinedGameDoc,
    fetched_at: Instant,
}

pub struct LiveDataStore {
    data_dir: PathBuf,
    cache: DashMap<String, CacheEntry>,
    last_scoreboard_state: DashMap<String, ProviderGameState>,
    leagues: HashMap<String, crate::config::LeagueIngestConfig>,
    provider: Arc<BreakerGuardedClient<HttpProviderClient>>,
    refiners: HashMap<String, Box<dyn Refiner>>,
    default_refiner: Box<dyn Refiner>,
}

impl LiveDataStore {
    pub fn new(config: &Config, provider: Arc<BreakerGuardedClient<HttpProviderClient>>) -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            cache: DashMap::new(),
            last_scoreboard_state: DashMap::new(),
            leagues: config.leagues.clone(),
            provider,
            refiners: HashMap::new(),
            default_refiner: Box::new(EspnStyleRefiner),
        }
    }

    fn raw_dir(&self, league: &str) -> PathBuf {
        self.data_dir.join(format!("{league}_raw_live_stats"))
    }

    fn refined_dir(&self, league: &str) -> PathBuf {
        self.data_dir.join(format!("{league}_refined_live_stats"))
    }

    fn refiner_for(&self, league: &str) -> &dyn Refiner {
        self.refiners.get(league).map(|b| b.as_ref()).unwrap_or(self.default_refiner.as_ref())
    }

    fn cache_ttl_for(&self, league: &str) -> Duration {
        let interval = self
            .leagues
            .get(league)
            .map(|c| c.interval)
            .unwrap_or(Duration::from_secs(20));
        let ninety_percent = Duration::from_secs_f64(interval.as_secs_f64() * 0.9);
        ninety_percent.max(MIN_CACHE_TTL)
    }

    /// Spawns one jittered-interval ingest task per configured league, and
    /// returns immediately. Tasks stop at the next tick boundary after
    /// `shutdown` is cancelled (spec §5 "background loops check a shutdown
    /// flag on every tick boundary").
    pub fn spawn_ingest_tasks(self: &Arc<Self>, leagues: &[String], shutdown: CancellationToken) {
        for league in leagues {
            let store = Arc::clone(self);
            let league = league.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                store.run_ingest_loop(&league, shutdown).await;
            });
        }
    }

    async fn run_ingest_loop(&self, league: &str, shutdown: CancellationToken) {
        let config = self.leagues.get(league).cloned().unwrap_or(crate::config::LeagueIngestConfig {
            interval: Duration::from_secs(20),
            jitter_percent: 10,
        });

        loop {
            let jitter_span = (config.interval.as_millis() as f64) * (config.jitter_percent as f64 / 100.0);
            let jitter_ms = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
            let sleep_ms = (config.interval.as_millis() as f64 + jitter_ms).max(1.0);

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms as u64)) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!(league, "ingest loop stopping at tick boundary");
                    return;
                }
            }

            if let Err(err) = self.tick(league).await {
                tracing::warn!(%err, league, "ingest tick failed");
            }
        }
    }

    async fn tick(&self, league: &str) -> anyhow::Result<()> {
        let Some(entries) = self.provider.fetch_scoreboard(league).await else {
            return Ok(());
        };

        for entry in &entries {
            self.last_scoreboard_state.insert(entry.game_id.clone(), entry.state);
        }

        let live: Vec<_> = entries
            .iter()
            .filter(|e| matches!(e.state, ProviderGameState::Pre | ProviderGameState::In))
            .collect();

        for entry in live {
            let Some(raw) = self.provider.fetch_boxscore(league, &entry.game_id).await else {
                continue;
            };

            if let Err(err) = self.write_atomic_json(&self.raw_dir(league), &entry.game_id, &raw).await {
                tracing::warn!(%err, league, game_id = %entry.game_id, "failed to persist raw boxscore");
                continue;
            }

            let refiner = self.refiner_for(league);
            match refiner.refine(&entry.game_id, &raw) {
                Ok(doc) => {
                    let value = serde_json::to_value(&doc)?;
                    if let Err(err) = self.write_atomic_json(&self.refined_dir(league), &entry.game_id, &value).await {
                        tracing::warn!(%err, league, game_id = %entry.game_id, "failed to persist refined game doc");
                        continue;
                    }
                    self.cache.insert(
                        entry.game_id.clone(),
                        CacheEntry {
                            league: league.to_string(),
                            doc,
                            fetched_at: Instant::now(),
                        },
                    );
                }
                Err(err) => {
                    tracing::warn!(%err, league, game_id = %entry.game_id, "refiner failed, keeping previous refined doc");
                }
            }
        }

        self.cleanup(league).await;
        Ok(())
    }

    async fn write_atomic_json(&self, dir: &Path, game_id: &str, value: &serde_json::Value) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let final_path = dir.join(format!("{game_id}.json"));
        let tmp_path = dir.join(format!(".{game_id}.json.tmp-{}", uuid::Uuid::new_v4()));

        let bytes = serde_json::to_vec_pretty(value)?;
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    async fn cleanup(&self, league: &str) {
        let raw_dir = self.raw_dir(league);
        let refined_dir = self.refined_dir(league);

        let Ok(mut raw_entries) = tokio::fs::read_dir(&raw_dir).await else {
            return;
        };

        while let Ok(Some(entry)) = raw_entries.next_entry().await {
            let path = entry.path();
            let Some(game_id) = game_id_from_path(&path) else { continue };
            let Ok(metadata) = entry.metadata().await else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            let age = modified.elapsed().unwrap_or_default();

            let state = self.last_scoreboard_state.get(&game_id).map(|s| *s);
            let is_final = self
                .cache
                .get(&game_id)
                .map(|e| e.doc.status == STATUS_FINAL)
                .unwrap_or(false);

            let grace = if is_final {
                Some(RAW_FINAL_GRACE)
            } else if matches!(state, Some(ProviderGameState::Post)) {
                Some(RAW_POST_GRACE)
            } else {
                None
            };

            if let Some(grace) = grace {
                if age >= grace {
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }

        let Ok(mut refined_entries) = tokio::fs::read_dir(&refined_dir).await else {
            return;
        };

        while let Ok(Some(entry)) = refined_entries.next_entry().await {
            let path = entry.path();
            let Some(game_id) = game_id_from_path(&path) else { continue };
            let raw_path = raw_dir.join(format!("{game_id}.json"));
            if tokio::fs::metadata(&raw_path).await.is_err() {
                let _ = tokio::fs::remove_file(&path).await;
                self.cache.remove(&game_id);
            }
        }
    }

    fn cache_or_league(&self, game_id: &str) -> Option<(String, Option<RefinedGameDoc>)> {
        self.cache.get(game_id).map(|e| {
            let fresh = e.fetched_at.elapsed() < self.cache_ttl_for(&e.league);
            (e.league.clone(), if fresh { Some(e.doc.clone()) } else { None })
        })
    }

    async fn get_doc(&self, game_id: &str) -> Option<RefinedGameDoc> {
        let (league, fresh_doc) = self.cache_or_league(game_id)?;
        if let Some(doc) = fresh_doc {
            return Some(doc);
        }

        let path = self.refined_dir(&league).join(format!("{game_id}.json"));
        let bytes = tokio::fs::read(&path).await.ok()?;
        let doc: RefinedGameDoc = serde_json::from_slice(&bytes).ok()?;
        self.cache.insert(
            game_id.to_string(),
            CacheEntry {
                league,
                doc: doc.clone(),
                fetched_at: Instant::now(),
            },
        );
        Some(doc)
    }

    pub fn invalidate(&self, game_id: &str) {
        self.cache.remove(game_id);
    }

    pub async fn get_game_status(&self, game_id: &str) -> Option<String> {
        self.get_doc(game_id).await.map(|d| d.status)
    }

    pub async fn get_game(&self, game_id: &str) -> Option<RefinedGameDoc> {
        self.get_doc(game_id).await
    }

    pub async fn get_team(&self, game_id: &str, team_id: &str) -> Option<super::types::TeamDoc> {
        self.get_doc(game_id).await.and_then(|d| d.team(team_id).cloned())
    }

    pub async fn get_home_team(&self, game_id: &str) -> Option<super::types::TeamDoc> {
        self.get_doc(game_id).await.and_then(|d| d.home_team().cloned())
    }

    pub async fn get_away_team(&self, game_id: &str) -> Option<super::types::TeamDoc> {
        self.get_doc(game_id).await.and_then(|d| d.away_team().cloned())
    }

    pub async fn get_possession_team_id(&self, game_id: &str) -> Option<String> {
        self.get_doc(game_id).await.and_then(|d| d.possession_team_id().map(str::to_string))
    }

    pub async fn get_player_stat(&self, game_id: &str, player_id: &str, category: &str, key: &str) -> Option<serde_json::Value> {
        self.get_doc(game_id).await.and_then(|d| d.player_stat(player_id, category, key))
    }

    pub fn breaker_state(&self, league: &str) -> super::circuit_breaker::BreakerState {
        self.provider.breaker_state(league)
    }

    /// Injects a refined game doc directly into the cache, bypassing the
    /// provider and filesystem. Used by tests that need `get_game`/
    /// `get_player_stat` to resolve without network or disk access.
    #[cfg(test)]
    pub fn seed_game(&self, league: &str, doc: RefinedGameDoc) {
        self.cache.insert(
            doc.game_id.clone(),
            CacheEntry {
                league: league.to_string(),
                doc,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Lists the games currently refined for `league`, for the bootstrap
    /// endpoint's "games + modes" payload (spec §6.1).
    pub async fn list_games(&self, league: &str) -> Vec<(String, String)> {
        let dir = self.refined_dir(league);
        let mut out = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return out;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(game_id) = game_id_from_path(&path) else { continue };
            if let Some(doc) = self.get_doc(&game_id).await {
                out.push((doc.game_id.clone(), doc.status.clone()));
            }
        }
        out
    }
}

fn game_id_from_path(path: &Path) -> Option<String> {
    let name = path.file_stem()?.to_str()?;
    if name.starts_with('.') {
        return None;
    }
    Some(name.to_string())
}
