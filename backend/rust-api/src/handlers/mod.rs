use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::sync::Arc;

use crate::metrics;
use crate::services::AppState;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "message": "Irish Driving Test AI"
    }))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = check_session_store(&state).await;
    let healthy = store.get("status").and_then(|v| v.as_str()) == Some("healthy");

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "service": "driving-coach-api",
            "version": env!("CARGO_PKG_VERSION"),
            "model": state.model.model_name(),
            "dependencies": { "session_store": store }
        })),
    )
}

async fn check_session_store(state: &AppState) -> serde_json::Map<String, serde_json::Value> {
    let mut result = serde_json::Map::new();
    let store = &state.sessions;
    result.insert("backend".to_string(), json!(store.backend_name()));

    match tokio::time::timeout(std::time::Duration::from_millis(500), store.health()).await {
        Ok(Ok(())) => {
            result.insert("status".to_string(), json!("healthy"));
        }
        Ok(Err(e)) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(e.to_string()));
            return result;
        }
        Err(_) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!("session store timeout after 500ms"));
            return result;
        }
    }

    if let Ok(Some(active)) = store.len().await {
        result.insert("active_sessions".to_string(), json!(active));
    }

    result
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Read from the store so sessions that expired in Redis are not counted
    match state.sessions.len().await {
        Ok(Some(active)) => metrics::QUIZ_SESSIONS_ACTIVE.set(active as i64),
        Ok(None) => {}
        Err(e) => tracing::warn!("Could not count active sessions: {}", e),
    }

    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Protects /metrics with HTTP Basic auth against `METRICS_AUTH`
/// (`username:password`).
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let encoded = auth_header
        .strip_prefix("Basic ")
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    let expected = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());

    if credentials != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

pub mod analysis;
pub mod sessions;
