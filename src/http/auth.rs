//! Bearer-token authentication is an external collaborator per spec §1
//! ("the browser UI, authentication middleware ... " are out of scope).
//! This extractor honours the wire contract spec §6.1 requires — a Bearer
//! token identifying the caller — without reimplementing the session/JWT
//! verification that belongs to that external layer. In this core, the
//! token *is* the caller's `user_id`.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use uuid::Uuid;

pub struct AuthUser(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::UNAUTHORIZED, "Authorization header must be a Bearer token"))?;

        let user_id = Uuid::parse_str(token.trim())
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid bearer token"))?;

        Ok(AuthUser(user_id))
    }
}
