// HTTP request handlers

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::middleware::{api_key_auth, request_context};
use super::AgentServer;
use crate::errors::{ApiError, ErrorCode};
use crate::tools::ExecutionContext;

/// Create the application router
pub fn create_router(server: Arc<AgentServer>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/query", post(handle_query))
        .route("/debug/tools-status", get(tools_status))
        .route("/debug/tool-schema/:name", get(tool_schema))
        .route("/metrics", get(metrics_endpoint))
        .layer(middleware::from_fn_with_state(Arc::clone(&server), api_key_auth))
        .layer(middleware::from_fn(request_context))
        .with_state(server)
}

/// Handle GET /health
pub async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok", "service": "aerodesk"}))
}

/// Handle POST /query
///
/// Body: `{"consulta": "...", "session_id"?: "..."}`. Caller credentials for
/// the tools come from the `Authorization: Bearer`, `X-Group-ID` and
/// `X-Usuario-ID` headers.
async fn handle_query(
    State(server): State<Arc<AgentServer>>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();
    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let Some(consulta) = body.get("consulta").and_then(Value::as_str) else {
        return Err(ErrorCode::MissingQuery.into());
    };

    let max_len = server.config().security.max_input_length;
    if consulta.chars().count() > max_len {
        return Err(ApiError::with_message(
            ErrorCode::InvalidRequest,
            format!("La consulta excede el máximo de {} caracteres", max_len),
        ));
    }

    let session = server
        .sessions()
        .get_or_create(body.get("session_id").and_then(Value::as_str))
        .map_err(|e| ApiError::with_message(ErrorCode::Internal, e.to_string()))?;
    server.metrics().set_active_sessions(server.sessions().active_count());

    let agent = server.agent();
    let mut session = session.lock().await;
    let context = ExecutionContext {
        session_id: Some(session.id.clone()),
        jwt_token: bearer_token(&headers),
        group_id: header_text(&headers, "x-group-id"),
        usuario_id: header_text(&headers, "x-usuario-id"),
    };

    let timeout = Duration::from_secs(server.config().server.request_timeout_secs);
    let turn = async {
        agent.ensure_tools_loaded().await;
        agent.process_message(&mut session, consulta, &context).await
    };
    let Ok(response) = tokio::time::timeout(timeout, turn).await else {
        let elapsed = started.elapsed().as_secs_f64();
        agent.abandon_turn(&mut session, elapsed);
        server.metrics().observe_query("timeout", elapsed);
        return Err(ApiError::new(ErrorCode::Timeout));
    };
    drop(session);

    server
        .metrics()
        .observe_query(&response.action_taken, started.elapsed().as_secs_f64());
    if response.is_error() {
        return Err(ApiError::with_message(ErrorCode::McpUnavailable, response.message));
    }

    let mut data = json!({
        "status": "ok",
        "response": response.message,
        "tool_used": response.tool_used,
        "reasoning": response.reasoning,
        "confidence": response.confidence,
        "session_id": response.session_id,
    });
    if let Some(execution) = response.metadata.get("execution_result").filter(|e| e.is_object()) {
        data["execution"] = execution.clone();
    }
    Ok(Json(json!({"data": data})))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Handle GET /debug/tools-status
async fn tools_status(State(server): State<Arc<AgentServer>>) -> Json<Value> {
    let agent = server.agent();
    agent.ensure_tools_loaded().await;
    Json(json!({"data": agent.tools_status().await}))
}

/// Handle GET /debug/tool-schema/:name
async fn tool_schema(
    State(server): State<Arc<AgentServer>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let agent = server.agent();
    agent.ensure_tools_loaded().await;
    match agent.tool_schema(&name) {
        Some(schema) => Ok(Json(json!({"name": name, "schema": schema}))),
        None if agent.available_tools().contains(&name) => {
            Ok(Json(json!({"name": name, "schema": Value::Null})))
        }
        None => Err(ApiError::with_message(
            ErrorCode::ToolNotFound,
            format!("Tool '{}' not found in registry", name),
        )),
    }
}

/// Handle GET /metrics - Prometheus text format
async fn metrics_endpoint(State(server): State<Arc<AgentServer>>) -> Result<Response, ApiError> {
    server.metrics().set_active_sessions(server.sessions().active_count());
    let body = server
        .metrics()
        .render()
        .map_err(|e| ApiError::with_message(ErrorCode::Internal, e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}
