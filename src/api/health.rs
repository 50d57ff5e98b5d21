// src/api/health.rs
//
// Health endpoint aggregating core dependencies and per-plugin checks.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

/// GET /health
///
/// status ∈ {up, degraded, unreachable}: the database decides between
/// up and unreachable; a down vector store or erroring plugin degrades.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();
    let qdrant_ok = state.rag.vector_store().health_check().await;
    let plugins = state.plugins.health_check_all().await;

    let plugin_errors = plugins
        .values()
        .flat_map(|deps| deps.values())
        .any(|status| status.starts_with("error"));

    let status = if !db_ok {
        "unreachable"
    } else if !qdrant_ok || plugin_errors {
        "degraded"
    } else {
        "up"
    };

    let response = json!({
        "status": status,
        "dependencies": {
            "database": if db_ok { "ok" } else { "error" },
            "vector_store": if qdrant_ok { "ok" } else { "error" },
            "plugins": plugins,
        },
    });

    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
