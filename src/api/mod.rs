// src/api/mod.rs
// HTTP boundary: routers per API area merged onto the app state

pub mod conversations;
pub mod entities;
pub mod error;
pub mod health;
pub mod plugins;
pub mod rag;
pub mod scheduled;
pub mod settings;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub use error::ApiError;

pub fn create_router(state: Arc<AppState>) -> Router {
    let rag_router = Router::new()
        .route("/query", post(rag::rag_query))
        .route("/search", post(rag::rag_search))
        .route("/stats", get(rag::rag_stats))
        .route("/labels", get(rag::rag_labels))
        .route("/reset", post(rag::rag_reset));

    let entities_router = Router::new()
        .route("/", get(entities::list_persons))
        .route("/stats", get(entities::stats))
        .route("/fact-keys", get(entities::fact_keys))
        .route("/merge", post(entities::merge_persons))
        .route("/merge-candidates", get(entities::merge_candidates))
        .route("/seed", post(entities::seed_contacts))
        .route("/cleanup", post(entities::cleanup))
        .route("/graph", get(entities::graph))
        .route("/full-graph", get(entities::full_graph))
        .route("/{id}", get(entities::get_person))
        .route("/{id}", delete(entities::delete_person))
        .route("/{id}/rename", post(entities::rename_person))
        .route("/{id}/aliases", post(entities::add_alias))
        .route("/{id}/aliases/{alias_id}", delete(entities::delete_alias))
        .route("/{id}/facts", post(entities::set_fact))
        .route("/{id}/facts/{key}", delete(entities::delete_fact))
        .route("/{id}/relationships", post(entities::add_relationship))
        .route(
            "/{id}/display-name-refresh",
            post(entities::refresh_display_name),
        );

    let scheduled_router = Router::new()
        .route("/", get(scheduled::list_tasks))
        .route("/", post(scheduled::create_task))
        .route("/{id}", get(scheduled::get_task))
        .route("/{id}", put(scheduled::update_task))
        .route("/{id}", delete(scheduled::delete_task))
        .route("/{id}/toggle", post(scheduled::toggle_task))
        .route("/{id}/run", post(scheduled::run_now))
        .route("/{id}/results", get(scheduled::get_results))
        .route("/results/{result_id}/rate", post(scheduled::rate_result));

    let conversations_router = Router::new()
        .route("/", get(conversations::list_conversations))
        .route("/{id}", get(conversations::get_conversation))
        .route("/{id}", delete(conversations::delete_conversation));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/plugins", get(plugins::list_plugins))
        .route("/plugins/{name}/enable", post(plugins::enable_plugin))
        .route("/plugins/{name}/disable", post(plugins::disable_plugin))
        .route("/settings", get(settings::list_settings))
        .route("/settings", put(settings::update_setting))
        .nest("/rag", rag_router)
        .nest("/entities", entities_router)
        .nest("/scheduled", scheduled_router)
        .nest("/conversations", conversations_router)
        .merge(state.plugins.routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
