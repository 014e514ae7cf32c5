// handlers/system.rs - service info and health

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "Stockroom API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Multi-tenant inventory API backed by per-user databases",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "auth": "/api/auth/register, /api/auth/login (public), /api/auth/whoami (protected)",
                "inventory": "/api/inventory[/:id[/reduce]] (protected)",
            }
        }
    }))
}

/// GET /health - 503 when the user directory cannot be reached
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let tenant_connections = state.tenants.len().await;

    match state.directory.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "directory": "ok",
                    "tenant_connections": tenant_connections
                }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "directory unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "directory_error": e.to_string(),
                        "tenant_connections": tenant_connections
                    }
                })),
            )
        }
    }
}
