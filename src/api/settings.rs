// src/api/settings.rs
// Settings listing and updates

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

use super::error::ApiError;

/// GET /settings — rows grouped by category, secrets masked
pub async fn list_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settings = state.settings.list().await.map_err(ApiError::internal)?;
    Ok(Json(json!({"settings": settings})))
}

#[derive(Deserialize)]
pub struct UpdateSettingRequest {
    pub key: String,
    pub value: String,
}

/// PUT /settings
pub async fn update_setting(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateSettingRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .settings
        .set(&request.key, &request.value)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"status": "updated", "key": request.key})))
}
