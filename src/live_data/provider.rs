//! HTTP client for the external sports provider, fronted per-league by a
//! `CircuitBreaker` (spec §4.A "Failure handling").
//!
//! Provider failures surface as `Ok(None)`/`Ok(vec![])`, never as a
//! propagated error — domain code branches on the value, it does not
//! `try/catch` for control flow (spec §9).

use super::circuit_breaker::CircuitBreaker;
use super::types::ScoreboardEntry;
use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

const FAILURE_THRESHOLD: u32 = 5;
const COOLDOWN: Duration = Duration::from_secs(30);

/// Outbound budget against the sports data provider, independent of the
/// per-league ingest interval: caps total request rate across all leagues
/// sharing one `HttpProviderClient` so a misconfigured jitter/interval pair
/// can't hammer the upstream.
const PROVIDER_REQUESTS_PER_SECOND: u32 = 10;

#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync {
    async fn fetch_scoreboard(&self, league: &str) -> Option<Vec<ScoreboardEntry>>;
    async fn fetch_boxscore(&self, league: &str, game_id: &str) -> Option<serde_json::Value>;
}

/// Wraps any `ProviderClient` with a per-league circuit breaker so a
/// persistently failing upstream stops burning request budget.
pub struct BreakerGuardedClient<C: ProviderClient> {
    inner: C,
    breakers: DashMap<String, CircuitBreaker>,
}

impl<C: ProviderClient> BreakerGuardedClient<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            breakers: DashMap::new(),
        }
    }

    fn breaker_for(&self, league: &str) -> dashmap::mapref::one::Ref<'_, String, CircuitBreaker> {
        self.breakers
            .entry(league.to_string())
            .or_insert_with(|| CircuitBreaker::new(FAILURE_THRESHOLD, COOLDOWN));
        self.breakers.get(league).expect("just inserted")
    }

    pub fn breaker_state(&self, league: &str) -> super::circuit_breaker::BreakerState {
        self.breaker_for(league).state()
    }

    pub async fn fetch_scoreboard(&self, league: &str) -> Option<Vec<ScoreboardEntry>> {
        if !self.breaker_for(league).allow_request() {
            return None;
        }
        match self.inner.fetch_scoreboard(league).await {
            Some(entries) => {
                self.breaker_for(league).record_success();
                Some(entries)
            }
            None => {
                self.breaker_for(league).record_failure();
                None
            }
        }
    }

    pub async fn fetch_boxscore(&self, league: &str, game_id: &str) -> Option<serde_json::Value> {
        if !self.breaker_for(league).allow_request() {
            return None;
        }
        match self.inner.fetch_boxscore(league, game_id).await {
            Some(doc) => {
                self.breaker_for(league).record_success();
                Some(doc)
            }
            None => {
                self.breaker_for(league).record_failure();
                None
            }
        }
    }
}

/// Production provider client. Talks to a configurable base URL, one
/// scoreboard/boxscore pair of endpoints per league, in the style of the
/// public ESPN-shaped scoreboard/summary endpoints this corpus scrapes.
type ProviderRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct HttpProviderClient {
    http: reqwest::Client,
    base_url: String,
    budget: ProviderRateLimiter,
}

impl HttpProviderClient {
    pub fn new(base_url: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(8))
            .connect_timeout(Duration::from_secs(4))
            .pool_max_idle_per_host(8)
            .build()?;
        let quota = Quota::per_second(
            NonZeroU32::new(PROVIDER_REQUESTS_PER_SECOND).expect("budget is non-zero"),
        );
        Ok(Self { http, base_url, budget: RateLimiter::direct(quota) })
    }
}

#[async_trait::async_trait]
impl ProviderClient for HttpProviderClient {
    async fn fetch_scoreboard(&self, league: &str) -> Option<Vec<ScoreboardEntry>> {
        self.budget.until_ready().await;
        let url = format!("{}/{}/scoreboard", self.base_url, league);
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Vec<ScoreboardEntry>>().await {
                Ok(entries) => Some(entries),
                Err(err) => {
                    tracing::warn!(%err, league, "scoreboard response failed to decode");
                    None
                }
            },
            Ok(resp) => {
                tracing::warn!(league, status = %resp.status(), "scoreboard request returned non-success");
                None
            }
            Err(err) => {
                tracing::warn!(%err, league, "scoreboard request failed");
                None
            }
        }
    }

    async fn fetch_boxscore(&self, league: &str, game_id: &str) -> Option<serde_json::Value> {
        self.budget.until_ready().await;
        let url = format!("{}/{}/summary", self.base_url, league);
        match self.http.get(&url).query(&[("event", game_id)]).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<serde_json::Value>().await {
                Ok(doc) => Some(doc),
                Err(err) => {
                    tracing::warn!(%err, league, game_id, "boxscore response failed to decode");
                    None
                }
            },
            Ok(resp) => {
                tracing::warn!(league, game_id, status = %resp.status(), "boxscore request returned non-success");
                None
            }
            Err(err) => {
                tracing::warn!(%err, league, game_id, "boxscore request failed");
                None
            }
        }
    }
}
