mod baseline;
mod config;
mod config_session;
mod db;
mod error;
mod http;
mod idempotency;
mod lifecycle;
mod live_data;
mod mode_config_cache;
mod modes;
mod proposal;
mod queue;
mod rate_limit;
mod redis_state;
mod resolver;

mod metrics;

use anyhow::Result;
use live_data::{BreakerGuardedClient, HttpProviderClient, LiveDataStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    dotenvy::dotenv().ok();

    info!("starting propbet-core");

    let config = Arc::new(config::Config::from_env()?);

    let db = db::connect(&config.database_url).await?;
    info!("connected to PostgreSQL and applied migrations");

    let redis = redis_state::RedisState::connect(&config.redis_url).await?;
    info!("connected to Redis");

    metrics::init();

    let modes = Arc::new(modes::ModeRegistry::new());
    modes.ensure_initialized()?;

    let provider = HttpProviderClient::new(config.live_data_provider_base_url.clone())?;
    let provider = Arc::new(BreakerGuardedClient::new(provider));
    let live_data = Arc::new(LiveDataStore::new(&config, provider));

    let baselines = Arc::new(baseline::BaselineStore::new(redis.clone()));
    let rate_limiter = Arc::new(rate_limit::RateLimiter::new(redis.clone()));
    let idempotency = Arc::new(idempotency::IdempotencyStore::new(redis.clone()));
    let sessions = Arc::new(config_session::ConfigSessionService::new(redis.clone(), modes.clone(), live_data.clone()));
    let mode_configs = Arc::new(mode_config_cache::ModeConfigCache::new());

    let proposals = Arc::new(proposal::ProposalService::new(
        db.clone(),
        modes.clone(),
        live_data.clone(),
        baselines.clone(),
        rate_limiter.clone(),
        sessions.clone(),
        mode_configs.clone(),
    ));

    let queue = Arc::new(queue::ResolutionQueue::new(redis.clone(), db.clone(), config.resolution_queue_concurrency));

    let lifecycle_worker = Arc::new(lifecycle::LifecycleWorker::new(
        db.clone(),
        config.bet_lifecycle_poll_interval_ms,
        config.bet_lifecycle_catchup_ms,
    ));

    let resolver_worker = Arc::new(resolver::ResolverWorker::new(
        db.clone(),
        live_data.clone(),
        baselines.clone(),
        modes.clone(),
        mode_configs.clone(),
        queue.clone(),
    ));

    let shutdown = CancellationToken::new();

    live_data.spawn_ingest_tasks(&config.active_leagues, shutdown.clone());

    let lifecycle_handle = tokio::spawn(lifecycle_worker.run(shutdown.clone()));
    let resolver_handle = tokio::spawn(resolver_worker.run(shutdown.clone()));
    let queue_handle = tokio::spawn(queue.clone().run(shutdown.clone()));

    let state = http::AppState {
        db: db.clone(),
        redis: redis.clone(),
        config: config.clone(),
        modes,
        live_data,
        baselines,
        rate_limiter,
        sessions,
        mode_configs,
        proposals,
        queue: queue.clone(),
        idempotency,
    };

    let app = http::router(state);
    let listener = TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "http server listening");

    // §4.G "Startup & shutdown" — the HTTP server stops accepting new work
    // first, then background workers drain, then the process exits (Redis
    // connections close implicitly when their last handle drops).
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("http server closed, signalling background workers to stop");
    shutdown.cancel();

    let _ = tokio::join!(lifecycle_handle, resolver_handle, queue_handle);
    info!("background workers drained, exiting");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
