//! The stable HTTP API (spec §6.1): router assembly and shared state.

pub mod auth;
pub mod dto;
pub mod handlers;
pub mod middleware;

use crate::baseline::BaselineStore;
use crate::config::Config;
use crate::config_session::ConfigSessionService;
use crate::idempotency::IdempotencyStore;
use crate::live_data::LiveDataStore;
use crate::mode_config_cache::ModeConfigCache;
use crate::modes::ModeRegistry;
use crate::proposal::ProposalService;
use crate::queue::ResolutionQueue;
use crate::rate_limit::RateLimiter;
use crate::redis_state::RedisState;
use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: RedisState,
    pub config: Arc<Config>,
    pub modes: Arc<ModeRegistry>,
    pub live_data: Arc<LiveDataStore>,
    pub baselines: Arc<BaselineStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub sessions: Arc<ConfigSessionService>,
    pub mode_configs: Arc<ModeConfigCache>,
    pub proposals: Arc<ProposalService>,
    pub queue: Arc<ResolutionQueue>,
    pub idempotency: Arc<IdempotencyStore>,
}

/// Builds the CORS layer from `config.cors_allowed_origins`; an empty list
/// (the default) permits any origin, a permissive posture meant for local
/// development.
fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .max_age(Duration::from_secs(600));

    if config.cors_allowed_origins.is_empty() {
        layer.allow_origin(tower_http::cors::Any)
    } else {
        let origins: Vec<_> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/bet-proposals/bootstrap/league/:league", get(handlers::bootstrap))
        .route("/bet-proposals/sessions", post(handlers::create_session))
        .route("/bet-proposals/sessions/:session_id/choices", post(handlers::apply_choice))
        .route("/bet-proposals/sessions/:session_id/general", post(handlers::set_general))
        .route("/tables/:table_id/bets", post(handlers::create_bet))
        .route("/bets/:bet_id/poke", post(handlers::poke_bet))
        .route("/bets/:bet_id/validate", post(handlers::validate_bet))
        .route("/bets/:bet_id/live-info", get(handlers::live_info))
        .route("/tickets", get(handlers::list_tickets))
        .route("/tables", get(handlers::list_tables))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
