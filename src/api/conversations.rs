// src/api/conversations.rs
// Conversation listing and retrieval

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

use super::error::ApiError;

/// GET /conversations
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversations = state
        .sessions
        .list_conversations()
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"conversations": conversations})))
}

/// GET /conversations/{id}
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let turns = state
        .sessions
        .get_turns(&id)
        .await
        .map_err(ApiError::internal)?;
    if turns.is_empty() {
        return Err(ApiError::not_found(format!("Conversation {} not found", id)));
    }
    Ok(Json(json!({"conversation_id": id, "turns": turns})))
}

/// DELETE /conversations/{id}
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .sessions
        .delete_conversation(&id)
        .await
        .map_err(ApiError::internal)?;
    state.session_costs.forget(&id).await;
    Ok(Json(json!({"deleted": deleted})))
}
