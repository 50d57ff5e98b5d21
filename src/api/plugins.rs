// src/api/plugins.rs
// Plugin listing and runtime toggling

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

use super::error::ApiError;

/// GET /plugins
pub async fn list_plugins(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({"plugins": state.plugins.discovered().await}))
}

/// POST /plugins/{name}/enable
pub async fn enable_plugin(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .plugins
        .enable_plugin(&name)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(Json(json!({"status": "enabled", "plugin": name})))
}

/// POST /plugins/{name}/disable
pub async fn disable_plugin(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .plugins
        .disable_plugin(&name)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(Json(json!({"status": "disabled", "plugin": name})))
}
