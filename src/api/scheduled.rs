// src/api/scheduled.rs
// Scheduler CRUD and result endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::scheduler::dispatcher::execute_task;
use crate::scheduler::types::ScheduleType;
use crate::state::AppState;

use super::error::ApiError;

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    pub schedule_type: String,
    pub schedule_value: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub filters: Option<serde_json::Value>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// GET /scheduled
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tasks = state
        .tasks
        .list_tasks(true)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"tasks": tasks})))
}

/// POST /scheduled
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let schedule_type: ScheduleType = request
        .schedule_type
        .parse()
        .map_err(ApiError::bad_request)?;
    let timezone = request
        .timezone
        .unwrap_or_else(|| crate::config::CONFIG.timezone.clone());

    let task = state
        .tasks
        .create_task(
            &request.name,
            &request.description,
            &request.prompt,
            schedule_type,
            &request.schedule_value,
            &timezone,
            &request.filters.unwrap_or_else(|| json!({})),
            request.enabled,
        )
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(serde_json::to_value(task).map_err(ApiError::internal)?))
}

/// GET /scheduled/{id}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task = state
        .tasks
        .get_task(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("Task {} not found", id)))?;
    let result_count = state
        .tasks
        .get_result_count(id)
        .await
        .map_err(ApiError::internal)?;
    let mut value = serde_json::to_value(task).map_err(ApiError::internal)?;
    value["result_count"] = json!(result_count);
    Ok(Json(value))
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub schedule_type: Option<String>,
    #[serde(default)]
    pub schedule_value: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub filters: Option<serde_json::Value>,
}

/// PUT /scheduled/{id}
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateTaskRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let schedule_type = match request.schedule_type.as_deref() {
        Some(raw) => Some(raw.parse::<ScheduleType>().map_err(ApiError::bad_request)?),
        None => None,
    };

    let task = state
        .tasks
        .update_task(
            id,
            request.name.as_deref(),
            request.description.as_deref(),
            request.prompt.as_deref(),
            schedule_type,
            request.schedule_value.as_deref(),
            request.timezone.as_deref(),
            request.filters.as_ref(),
        )
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("Task {} not found", id)))?;
    Ok(Json(serde_json::to_value(task).map_err(ApiError::internal)?))
}

/// DELETE /scheduled/{id}
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .tasks
        .delete_task(id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"deleted": deleted})))
}

/// POST /scheduled/{id}/toggle
pub async fn toggle_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let enabled = state
        .tasks
        .toggle_task(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("Task {} not found", id)))?;
    Ok(Json(json!({"enabled": enabled})))
}

/// POST /scheduled/{id}/run — execute immediately, out of schedule
pub async fn run_now(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task = state
        .tasks
        .get_task(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("Task {} not found", id)))?;

    let result_id = execute_task(&state.tasks, &state.rag, &task)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"status": "executed", "result_id": result_id})))
}

#[derive(Deserialize)]
pub struct ResultsParams {
    #[serde(default = "default_results_limit")]
    pub limit: i64,
}

fn default_results_limit() -> i64 {
    20
}

/// GET /scheduled/{id}/results
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<ResultsParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let results = state
        .tasks
        .get_results(id, params.limit)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"results": results})))
}

#[derive(Deserialize)]
pub struct RateRequest {
    pub rating: i64,
}

/// POST /scheduled/results/{result_id}/rate
pub async fn rate_result(
    State(state): State<Arc<AppState>>,
    Path(result_id): Path<i64>,
    Json(request): Json<RateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rated = state
        .tasks
        .rate_result(result_id, request.rating)
        .await
        .map_err(ApiError::bad_request)?;
    if !rated {
        return Err(ApiError::not_found(format!("Result {} not found", result_id)));
    }
    Ok(Json(json!({"status": "rated"})))
}
