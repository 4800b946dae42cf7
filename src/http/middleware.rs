//! `X-Request-ID` propagation (spec §6.1: "`X-Request-ID` is echoed on every
//! response and correlates to structured logs"). `tower_http::trace::TraceLayer`
//! gives us the span; this middleware mints or forwards the id, attaches it
//! to that span, and stamps it onto every JSON error body (spec §7
//! "Propagation": "the HTTP layer's global handler formats them and attaches
//! `requestId`").

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub async fn request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.headers_mut().insert(
        REQUEST_ID_HEADER.clone(),
        HeaderValue::from_str(&request_id).unwrap_or_else(|_| HeaderValue::from_static("invalid")),
    );

    tracing::Span::current().record("request_id", tracing::field::display(&request_id));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }

    if response.status().is_client_error() || response.status().is_server_error() {
        response = stamp_request_id(response, &request_id).await;
    }

    response
}

/// Rewrites a JSON error body to include `requestId`, tolerating non-JSON or
/// oversized bodies by passing them through untouched.
async fn stamp_request_id(response: Response, request_id: &str) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let stamped = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(serde_json::Value::Object(mut map)) => {
            map.insert("requestId".to_string(), serde_json::Value::String(request_id.to_string()));
            serde_json::to_vec(&map).unwrap_or_else(|_| bytes.to_vec())
        }
        _ => bytes.to_vec(),
    };

    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(stamped))
}
