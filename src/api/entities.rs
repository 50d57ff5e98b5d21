// src/api/entities.rs
// Entity CRUD and graph endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::entity::ContactSeed;
use crate::state::AppState;

use super::error::ApiError;

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /entities
pub async fn list_persons(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let persons = match params.q {
        Some(ref q) if !q.trim().is_empty() => state
            .entity
            .search_persons(q, params.limit)
            .await
            .map_err(ApiError::internal)?,
        _ => state
            .entity
            .get_all_persons_summary()
            .await
            .map_err(ApiError::internal)?,
    };
    Ok(Json(json!({"persons": persons})))
}

/// GET /entities/{id}
pub async fn get_person(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(cached) = state.identity_cache.get(id) {
        return Ok(Json(serde_json::to_value(&*cached).map_err(ApiError::internal)?));
    }

    let person = state
        .entity
        .get_person(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("Person {} not found", id)))?;

    let cached = state.identity_cache.put(id, person);
    Ok(Json(serde_json::to_value(&*cached).map_err(ApiError::internal)?))
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

/// POST /entities/{id}/rename
pub async fn rename_person(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let renamed = state
        .entity
        .rename_person(id, &request.name)
        .await
        .map_err(ApiError::internal)?;
    if !renamed {
        return Err(ApiError::not_found(format!("Person {} not found", id)));
    }
    state.identity_cache.invalidate(id);
    Ok(Json(json!({"status": "renamed"})))
}

/// DELETE /entities/{id}
pub async fn delete_person(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .entity
        .delete_person(id)
        .await
        .map_err(ApiError::internal)?;
    state.identity_cache.invalidate(id);
    Ok(Json(json!({"deleted": deleted})))
}

#[derive(Deserialize)]
pub struct MergeRequest {
    pub target_id: i64,
    pub source_ids: Vec<i64>,
}

/// POST /entities/merge
pub async fn merge_persons(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MergeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .entity
        .merge_persons(request.target_id, &request.source_ids)
        .await
        .map_err(ApiError::bad_request)?;
    // Merge rewires many rows; drop the whole identity cache
    state.identity_cache.clear();
    Ok(Json(serde_json::to_value(outcome).map_err(ApiError::internal)?))
}

#[derive(Deserialize)]
pub struct AliasRequest {
    pub alias: String,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "manual".to_string()
}

/// POST /entities/{id}/aliases
pub async fn add_alias(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<AliasRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .entity
        .add_alias(id, &request.alias, &request.source)
        .await
        .map_err(ApiError::internal)?;
    state.identity_cache.invalidate(id);
    Ok(Json(json!({"status": "added"})))
}

/// DELETE /entities/{id}/aliases/{alias_id}
pub async fn delete_alias(
    State(state): State<Arc<AppState>>,
    Path((id, alias_id)): Path<(i64, i64)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .entity
        .delete_alias(alias_id)
        .await
        .map_err(ApiError::internal)?;
    state.identity_cache.invalidate(id);
    Ok(Json(json!({"deleted": deleted})))
}

#[derive(Deserialize)]
pub struct FactRequest {
    pub key: String,
    pub value: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_fact_source")]
    pub source_type: String,
    #[serde(default)]
    pub source_ref: Option<String>,
    #[serde(default)]
    pub source_quote: Option<String>,
}

fn default_confidence() -> f64 {
    0.9
}

fn default_fact_source() -> String {
    "manual".to_string()
}

/// POST /entities/{id}/facts
pub async fn set_fact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<FactRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let written = state
        .entity
        .set_fact(
            id,
            &request.key,
            &request.value,
            request.confidence,
            &request.source_type,
            request.source_ref.as_deref(),
            request.source_quote.as_deref(),
        )
        .await
        .map_err(ApiError::internal)?;
    state.identity_cache.invalidate(id);
    Ok(Json(json!({"written": written})))
}

/// DELETE /entities/{id}/facts/{key}
pub async fn delete_fact(
    State(state): State<Arc<AppState>>,
    Path((id, key)): Path<(i64, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .entity
        .delete_fact(id, &key)
        .await
        .map_err(ApiError::internal)?;
    state.identity_cache.invalidate(id);
    Ok(Json(json!({"deleted": deleted})))
}

#[derive(Deserialize)]
pub struct RelationshipRequest {
    pub related_person_id: i64,
    pub relationship_type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source_ref: Option<String>,
}

/// POST /entities/{id}/relationships
pub async fn add_relationship(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<RelationshipRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .entity
        .add_relationship(
            id,
            request.related_person_id,
            &request.relationship_type,
            request.confidence,
            request.source_ref.as_deref(),
        )
        .await
        .map_err(ApiError::internal)?;
    state.identity_cache.invalidate(id);
    state.identity_cache.invalidate(request.related_person_id);
    Ok(Json(json!({"status": "added"})))
}

/// POST /entities/seed
pub async fn seed_contacts(
    State(state): State<Arc<AppState>>,
    Json(contacts): Json<Vec<ContactSeed>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .entity
        .seed_from_contacts(&contacts)
        .await
        .map_err(ApiError::internal)?;
    state.identity_cache.clear();
    Ok(Json(serde_json::to_value(outcome).map_err(ApiError::internal)?))
}

/// POST /entities/cleanup
pub async fn cleanup(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .entity
        .cleanup_garbage_persons()
        .await
        .map_err(ApiError::internal)?;
    state.identity_cache.clear();
    Ok(Json(json!({"deleted_count": deleted.len(), "deleted": deleted})))
}

/// GET /entities/merge-candidates
pub async fn merge_candidates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let candidates = state
        .entity
        .find_merge_candidates(params.limit as usize)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"candidates": candidates})))
}

/// GET /entities/graph
pub async fn graph(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let graph = state
        .entity
        .get_graph_data(params.limit.max(1))
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(serde_json::to_value(graph).map_err(ApiError::internal)?))
}

/// GET /entities/full-graph
pub async fn full_graph(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let graph = state
        .entity
        .get_full_graph_data(params.limit.max(1), 10)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(serde_json::to_value(graph).map_err(ApiError::internal)?))
}

/// POST /entities/{id}/display-name-refresh
pub async fn refresh_display_name(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let new_name = state
        .entity
        .refresh_display_name(id)
        .await
        .map_err(ApiError::internal)?;
    state.identity_cache.invalidate(id);
    Ok(Json(json!({"display_name": new_name})))
}

/// GET /entities/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let entity_stats = state.entity.get_stats().await.map_err(ApiError::internal)?;
    let edge_stats = state
        .entity
        .get_asset_edge_stats()
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"tables": entity_stats, "edges": edge_stats})))
}

/// GET /entities/fact-keys
pub async fn fact_keys(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let keys = state.entity.get_fact_keys().await.map_err(ApiError::internal)?;
    Ok(Json(json!({"keys": keys})))
}
