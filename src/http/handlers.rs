//! Handlers for the stable HTTP API (spec §6.1).

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::Row;
use uuid::Uuid;

use crate::db::models::{BetProposal, Ticket, EVENT_TYPE_LIVE_INFO_SNAPSHOT};
use crate::error::{AppError, AppResult};
use crate::http::auth::AuthUser;
use crate::http::dto::*;
use crate::http::AppState;
use crate::idempotency::{Claim, StoredResponse};
use crate::proposal::{ProposalSource, ProposeBetInput};
use crate::rate_limit::RateLimitDecision;

const DEFAULT_PAGE_LIMIT: i64 = 20;
const MAX_PAGE_LIMIT: i64 = 100;

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "X-RateLimit-Remaining",
        HeaderValue::from_str(&decision.remaining.to_string()).unwrap(),
    );
    headers.insert(
        "X-RateLimit-Reset",
        HeaderValue::from_str(&decision.reset_at.to_string()).unwrap(),
    );
    headers
}

async fn fetch_bet(db: &sqlx::PgPool, bet_id: Uuid) -> AppResult<BetProposal> {
    sqlx::query_as::<_, BetProposal>("SELECT * FROM bet_proposals WHERE bet_id = $1")
        .bind(bet_id)
        .fetch_optional(db)
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .ok_or_else(|| AppError::NotFound("bet not found".to_string()))
}

// ---------------------------------------------------------------------
// GET /health, GET /metrics
// ---------------------------------------------------------------------

pub async fn health(State(state): State<AppState>) -> Response {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let redis_ok = state.redis.ping().await.is_ok();
    let queue_ok = state.queue.failed_count().await.unwrap_or(0) < 1_000;

    let status = if db_ok && redis_ok {
        if queue_ok { "healthy" } else { "degraded" }
    } else {
        "unhealthy"
    };

    let body = json!({
        "status": status,
        "checks": {
            "database": db_ok,
            "redis": redis_ok,
            "resolution_queue": queue_ok,
        },
    });

    let code = if status == "unhealthy" { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (code, Json(body)).into_response()
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    if let Ok(waiting) = state.queue.waiting_count().await {
        crate::metrics::RESOLUTION_QUEUE_DEPTH.with_label_values(&["waiting"]).set(waiting);
    }
    if let Ok(active) = state.queue.active_count().await {
        crate::metrics::RESOLUTION_QUEUE_DEPTH.with_label_values(&["active"]).set(active);
    }
    if let Ok(failed) = state.queue.failed_count().await {
        crate::metrics::RESOLUTION_QUEUE_DEPTH.with_label_values(&["failed"]).set(failed);
    }
    for league in &state.config.active_leagues {
        let gauge_value = state.live_data.breaker_state(league).as_gauge_value();
        crate::metrics::INGEST_CIRCUIT_BREAKER_STATE.with_label_values(&[league]).set(gauge_value);
    }

    match crate::metrics::render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            tracing::error!(%err, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ---------------------------------------------------------------------
// GET /bet-proposals/bootstrap/league/:league
// ---------------------------------------------------------------------

pub async fn bootstrap(
    State(state): State<AppState>,
    Path(league): Path<String>,
    _auth: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let league = league.to_uppercase();

    let modes: Vec<_> = state
        .modes
        .list()
        .into_iter()
        .filter(|m| m.supported_leagues().allows(&league))
        .map(|m| {
            json!({
                "key": m.key(),
                "label": m.label(),
                "overview": m.overview(),
                "requires_in_progress": m.requires_in_progress(),
                "has_automatic_validator": m.has_automatic_validator(),
            })
        })
        .collect();

    let games: Vec<_> = state
        .live_data
        .list_games(&league)
        .await
        .into_iter()
        .map(|(game_id, status)| json!({ "game_id": game_id, "status": status }))
        .collect();

    Ok(Json(json!({
        "league": league,
        "modes": modes,
        "games": games,
        "general_config_schema": {
            "wager_amount": { "min": "0.25", "max": "5.00" },
            "time_limit_seconds": { "min": 10, "max": 120 },
        },
    })))
}

// ---------------------------------------------------------------------
// Config session endpoints
// ---------------------------------------------------------------------

pub async fn create_session(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(body): Json<CreateSessionRequest>,
) -> AppResult<Json<crate::config_session::ConfigSession>> {
    validate_body(&body)?;
    let session = state.sessions.create_session(&body.mode_key, &body.league, body.league_game_id).await?;
    Ok(Json(session))
}

pub async fn apply_choice(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    _auth: AuthUser,
    Json(body): Json<ApplyChoiceRequest>,
) -> AppResult<Json<crate::config_session::ConfigSession>> {
    validate_body(&body)?;
    let session = state.sessions.apply_choice(session_id, &body.step_key, &body.choice_id).await?;
    Ok(Json(session))
}

pub async fn set_general(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    _auth: AuthUser,
    Json(body): Json<SetGeneralRequest>,
) -> AppResult<Json<crate::config_session::ConfigSession>> {
    let session = state.sessions.set_general(session_id, body.wager_amount, body.time_limit_seconds).await?;
    Ok(Json(session))
}

// ---------------------------------------------------------------------
// POST /tables/:tableId/bets  (idempotency-aware)
// ---------------------------------------------------------------------

fn bet_response(status: StatusCode, bet: BetProposal, decision: &RateLimitDecision) -> (Response, StoredResponse) {
    let body = BetProposalResponse::from(bet);
    let value = serde_json::to_value(&body).unwrap_or_default();
    let stored = StoredResponse { status: status.as_u16(), body: value.clone() };
    let mut response = (status, Json(value)).into_response();
    response.headers_mut().extend(rate_limit_headers(decision));
    (response, stored)
}

fn build_create_bet_source(body: CreateBetRequest) -> AppResult<ProposalSource> {
    if let Some(config_session_id) = body.config_session_id {
        return Ok(ProposalSource::Session { config_session_id });
    }
    let mode_key = body.mode_key.ok_or_else(|| AppError::BadInput("mode_key is required".to_string()))?;
    let league = body.league.ok_or_else(|| AppError::BadInput("league is required".to_string()))?;
    let wager_amount = body.wager_amount.ok_or_else(|| AppError::BadInput("wager_amount is required".to_string()))?;
    let time_limit_seconds = body
        .time_limit_seconds
        .ok_or_else(|| AppError::BadInput("time_limit_seconds is required".to_string()))?;
    Ok(ProposalSource::RawBody {
        mode_key,
        league,
        league_game_id: body.league_game_id,
        mode_config: body.mode_config.unwrap_or(serde_json::Value::Object(Default::default())),
        wager_amount,
        time_limit_seconds,
    })
}

pub async fn create_bet(
    State(state): State<AppState>,
    Path(table_id): Path<Uuid>,
    headers: HeaderMap,
    auth: AuthUser,
    Json(body): Json<CreateBetRequest>,
) -> AppResult<Response> {
    let idempotency_key = headers.get("Idempotency-Key").and_then(|v| v.to_str().ok()).map(str::to_string);

    if let Some(key) = &idempotency_key {
        match state.idempotency.claim(key).await.map_err(AppError::Internal)? {
            Claim::Conflict => return Err(AppError::IdempotencyConflict),
            Claim::Replay(stored) => {
                let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK);
                return Ok((status, Json(stored.body)).into_response());
            }
            Claim::Acquired => {}
        }
    }

    let source = build_create_bet_source(body);
    let result = match source {
        Ok(source) => state
            .proposals
            .propose(ProposeBetInput { table_id, proposer_user_id: auth.0, source })
            .await
            .map(|(bet, decision)| bet_response(StatusCode::CREATED, bet, &decision)),
        Err(err) => Err(err),
    };

    match (&idempotency_key, &result) {
        (Some(key), Ok((_, stored))) => {
            let _ = state.idempotency.complete(key, stored).await;
        }
        (Some(key), Err(_)) => {
            let _ = state.idempotency.release(key).await;
        }
        (None, _) => {}
    }

    result.map(|(response, _)| response)
}

pub async fn poke_bet(
    State(state): State<AppState>,
    Path(bet_id): Path<Uuid>,
    auth: AuthUser,
) -> AppResult<Response> {
    let (bet, decision) = state.proposals.poke(bet_id, auth.0).await?;
    let (response, _) = bet_response(StatusCode::CREATED, bet, &decision);
    Ok(response)
}

pub async fn validate_bet(
    State(state): State<AppState>,
    Path(bet_id): Path<Uuid>,
    _auth: AuthUser,
    Json(body): Json<ValidateBetRequest>,
) -> AppResult<Json<serde_json::Value>> {
    validate_body(&body)?;
    state.proposals.validate_manual(&state.queue, bet_id, &body.winning_choice).await?;
    Ok(Json(json!({ "success": true })))
}

// ---------------------------------------------------------------------
// GET /bets/:betId/live-info
// ---------------------------------------------------------------------

pub async fn live_info(
    State(state): State<AppState>,
    Path(bet_id): Path<Uuid>,
    _auth: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let bet = fetch_bet(&state.db, bet_id).await?;

    if bet.bet_status.is_terminal() {
        let row = sqlx::query(
            "SELECT payload FROM resolution_history WHERE bet_id = $1 AND event_type = $2 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(bet_id)
        .bind(EVENT_TYPE_LIVE_INFO_SNAPSHOT)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

        let payload = row
            .map(|r| r.try_get::<serde_json::Value, _>("payload"))
            .transpose()
            .map_err(|e| AppError::Internal(e.into()))?
            .unwrap_or_else(|| json!({ "fields": [] }));
        return Ok(Json(payload));
    }

    let module = state.modes.lookup(&bet.league, &bet.mode_key)?;
    let config = state
        .mode_configs
        .get(&state.db, bet_id)
        .await
        .map_err(AppError::Internal)?
        .unwrap_or_else(|| json!({}));
    let baseline = state
        .baselines
        .get(&bet.mode_key, bet_id)
        .await
        .map_err(AppError::Internal)?
        .unwrap_or_else(|| json!({}));

    let fields = module.get_live_info(&state.live_data, &bet, &config, &baseline).await;
    Ok(Json(json!({ "fields": fields })))
}

// ---------------------------------------------------------------------
// GET /tickets
// ---------------------------------------------------------------------

pub async fn list_tickets(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<TicketsQuery>,
) -> AppResult<Json<Vec<Ticket>>> {
    let limit = clamp_limit(query.limit);

    let tickets = sqlx::query_as::<_, Ticket>(
        "SELECT p.participation_id, p.bet_id, p.user_id, p.user_guess, p.participation_time, \
                b.table_id, b.league, b.mode_key, b.description, b.wager_amount, b.bet_status, b.winning_choice \
         FROM bet_participations p \
         JOIN bet_proposals b ON b.bet_id = p.bet_id \
         WHERE p.user_id = $1 \
           AND ($2::timestamptz IS NULL OR (p.participation_time, p.participation_id) < ($2, $3)) \
         ORDER BY p.participation_time DESC, p.participation_id DESC \
         LIMIT $4",
    )
    .bind(auth.0)
    .bind(query.before_participated_at)
    .bind(query.before_participation_id)
    .bind(limit)
    .fetch_all(&state.db)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    Ok(Json(tickets))
}

// ---------------------------------------------------------------------
// GET /tables
// ---------------------------------------------------------------------

pub async fn list_tables(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<TablesQuery>,
) -> AppResult<Json<Vec<crate::db::models::TableSummary>>> {
    let limit = clamp_limit(query.limit);

    let tables = sqlx::query_as::<_, crate::db::models::TableSummary>(
        "SELECT t.id AS table_id, t.name, t.last_activity_at \
         FROM tables t \
         JOIN table_members m ON m.table_id = t.id \
         WHERE m.user_id = $1 \
           AND ($2::timestamptz IS NULL OR (t.last_activity_at, t.id) < ($2, $3)) \
         ORDER BY t.last_activity_at DESC, t.id DESC \
         LIMIT $4",
    )
    .bind(auth.0)
    .bind(query.before_activity_at)
    .bind(query.before_table_id)
    .bind(limit)
    .fetch_all(&state.db)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    Ok(Json(tables))
}
