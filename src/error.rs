//! Typed error taxonomy for the HTTP boundary (see spec §7).
//!
//! Domain code returns `AppResult<T>`; the axum `IntoResponse` impl below is
//! the single place that maps a domain error onto a wire response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    BadInput(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("idempotency conflict")]
    IdempotencyConflict,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        retry_after_secs: u64,
        limit: u32,
        reset_at: i64,
    },

    #[error("mode not found")]
    ModeNotFound,

    #[error("mode unavailable for league")]
    ModeUnavailableForLeague,

    /// §8 S5 — manual U2Pick validation against an option outside the
    /// recorded list; the response carries `valid_options` alongside the
    /// usual `BAD_INPUT` shape.
    #[error("'{winning_choice}' is not a recorded option")]
    InvalidChoice {
        winning_choice: String,
        valid_options: Vec<String>,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::BadInput(_) => "BAD_INPUT",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::ModeNotFound => "MODE_NOT_FOUND",
            AppError::ModeUnavailableForLeague => "MODE_UNAVAILABLE_FOR_LEAGUE",
            AppError::InvalidChoice { .. } => "BAD_INPUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::IdempotencyConflict => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ModeNotFound => StatusCode::NOT_FOUND,
            AppError::ModeUnavailableForLeague => StatusCode::BAD_REQUEST,
            AppError::InvalidChoice { .. } => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(ref e) = self {
            tracing::error!(error = ?e, "internal error");
        }

        let status = self.status();
        let code = self.code();
        let message = if matches!(self, AppError::Internal(_)) {
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });

        if let AppError::Validation(details) = &self {
            body["details"] = serde_json::to_value(details).unwrap_or_default();
        }
        if let AppError::InvalidChoice { valid_options, .. } = &self {
            body["valid_options"] = serde_json::to_value(valid_options).unwrap_or_default();
        }

        let mut response = (status, Json(body)).into_response();

        if let AppError::RateLimited { retry_after_secs, limit, reset_at } = self {
            let headers = response.headers_mut();
            headers.insert("Retry-After", retry_after_secs.to_string().parse().unwrap());
            headers.insert("X-RateLimit-Remaining", "0".parse().unwrap());
            headers.insert("X-RateLimit-Reset", reset_at.to_string().parse().unwrap());
            let _ = limit;
        }

        response
    }
}
