// handlers/public.rs - unauthenticated endpoints

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "YachtOps API",
            "version": version,
            "description": "Multi-tenant yacht operations API",
            "endpoints": {
                "session": "/api/session (authenticated)",
                "data": "/api/data/:resource[/:id[/:action]] (tenant scoped)",
                "find": "/api/find/:resource (tenant scoped)",
                "reports": "/api/reports/summary (tenant scoped)",
                "admin": "/api/admin/* (platform or roles.manage)",
            },
            "resources": crate::resource::Resource::DATA.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        }
    }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let backend = state.store.backend();

    match state.store.ping().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "store": backend,
                }
            })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "store unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "store": backend,
                    }
                })),
            )
        }
    }
}
