// Request id, timing and API key middleware

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Instrument};
use uuid::Uuid;

use super::AgentServer;
use crate::errors::{ApiError, ErrorCode};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tag each request with an id and log its start and completion
pub async fn request_context(request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path()
    );

    async move {
        let started = Instant::now();
        info!("request_started");
        let mut response = next.run(request).await;
        info!(
            status_code = response.status().as_u16(),
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "request_completed"
        );
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Reject requests without a valid API key when keys are required
///
/// `/health` stays open for probes.
pub async fn api_key_auth(
    State(server): State<Arc<AgentServer>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let security = &server.config().security;
    if !security.require_api_key || request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(security.api_key_header.as_str())
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(key) if security.api_keys.iter().any(|k| k == key) => next.run(request).await,
        Some(_) => ApiError::with_message(ErrorCode::Unauthorized, "Invalid API key").into_response(),
        None => ApiError::new(ErrorCode::Unauthorized).into_response(),
    }
}
