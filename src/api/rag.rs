// src/api/rag.rs
// Conversational retrieval endpoint

use axum::{
    extract::{ConnectInfo, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::rag::{filter_sources_for_display, DocumentSource, HistoryTurn, SearchFilters};
use crate::state::AppState;

use super::error::ApiError;

/// Sources rendered back to the caller for citations
const DISPLAY_SOURCE_LIMIT: usize = 8;
const DISPLAY_MIN_SCORE: f32 = 0.0;

#[derive(Debug, Deserialize)]
pub struct RagQueryRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub filter_chat_name: Option<String>,
    #[serde(default)]
    pub filter_sender: Option<String>,
    #[serde(default)]
    pub filter_days: Option<i64>,
    #[serde(default)]
    pub filter_sources: Option<Vec<String>>,
    #[serde(default)]
    pub filter_date_from: Option<i64>,
    #[serde(default)]
    pub filter_date_to: Option<i64>,
    #[serde(default)]
    pub filter_content_types: Option<Vec<String>>,
    /// "relevance" (default), "date_desc" or "date_asc" — affects the
    /// displayed source order only
    #[serde(default)]
    pub sort_order: Option<String>,
}

fn default_k() -> usize {
    10
}

impl RagQueryRequest {
    fn filters(&self) -> SearchFilters {
        let sources = self.filter_sources.as_ref().map(|list| {
            list.iter()
                .filter_map(|s| s.parse::<DocumentSource>().ok())
                .collect()
        });
        SearchFilters {
            chat_name: self.filter_chat_name.clone(),
            sender: self.filter_sender.clone(),
            days: self.filter_days,
            sources,
            date_from: self.filter_date_from,
            date_to: self.filter_date_to,
            content_types: self.filter_content_types.clone(),
        }
    }
}

/// POST /rag/query
pub async fn rag_query(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<RagQueryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // LLM-invoking endpoint: rate-limited per client address
    if !state.rate_limiter.check(addr.ip()) {
        return Err(ApiError::TooManyRequests);
    }

    if request.question.trim().is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }

    let conversation_id = request
        .conversation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let filters = request.filters();

    // History for condensing and follow-up awareness
    let turns = state
        .sessions
        .get_turns(&conversation_id)
        .await
        .map_err(ApiError::internal)?;
    let history: Vec<HistoryTurn> = turns
        .iter()
        .map(|t| HistoryTurn {
            user_text: t.user_text.clone(),
            assistant_text: t.assistant_text.clone(),
        })
        .collect();

    let outcome = state
        .rag
        .chat_turn(&request.question, &history, request.k, &filters)
        .await
        .map_err(ApiError::internal)?;

    let mut sources =
        filter_sources_for_display(&outcome.nodes, DISPLAY_MIN_SCORE, DISPLAY_SOURCE_LIMIT);
    match request.sort_order.as_deref() {
        Some("date_desc") => sources.sort_by_key(|n| std::cmp::Reverse(n.timestamp)),
        Some("date_asc") => sources.sort_by_key(|n| n.timestamp),
        _ => {}
    }
    let sources_json = json!(sources);
    let filters_json = serde_json::to_value(&filters).unwrap_or_default();

    state
        .sessions
        .add_turn(
            &conversation_id,
            &request.question,
            &outcome.answer,
            &sources_json,
            &[],
            &outcome.retrieved_ids,
            &filters_json,
        )
        .await
        .map_err(ApiError::internal)?;

    // Session total is the sum over the stored turns' costs plus this one
    let session_total = state
        .session_costs
        .add(&conversation_id, outcome.cost_usd)
        .await;

    Ok(Json(json!({
        "answer": outcome.answer,
        "sources": sources,
        "rich_content": [],
        "conversation_id": conversation_id,
        "cost": {
            "query_cost_usd": outcome.cost_usd,
            "session_total_usd": session_total,
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub metadata_only: bool,
    #[serde(default)]
    pub filter_chat_name: Option<String>,
    #[serde(default)]
    pub filter_sender: Option<String>,
    #[serde(default)]
    pub filter_days: Option<i64>,
}

/// POST /rag/search — raw retrieval without answer synthesis
pub async fn rag_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let filters = SearchFilters {
        chat_name: request.filter_chat_name,
        sender: request.filter_sender,
        days: request.filter_days,
        ..Default::default()
    };

    let nodes = state
        .rag
        .search(&request.query, request.k, &filters, request.metadata_only)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({"results": nodes})))
}

/// GET /rag/stats
pub async fn rag_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.rag.stats().await)
}

/// GET /rag/labels — cached chat and sender lists for filter UIs
pub async fn rag_labels(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let chats = state.rag.get_chat_list().await;
    let senders = state.rag.get_sender_list().await;
    Json(json!({"chats": chats, "senders": senders}))
}

/// POST /rag/reset — drop and recreate the collection
pub async fn rag_reset(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .rag
        .reset_collection()
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"status": "reset"})))
}
