use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::warn;

use crate::api_state::ApiState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness: the database and cache must both answer.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let db_ok = state.db.client.query("RETURN 1").await.is_ok();
    let cache_ok = state.cache.health_check().await;

    if db_ok && cache_ok {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        warn!(db_ok, cache_ok, "readiness probe failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "db": db_ok, "cache": cache_ok })),
        )
    }
}
