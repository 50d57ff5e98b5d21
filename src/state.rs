// src/state.rs
// Application state shared across handlers

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::CONFIG;
use crate::entity::{EntityStore, IdentityCache};
use crate::llm::OpenAIEmbeddings;
use crate::plugins::{PluginContext, PluginRegistry};
use crate::rag::RagEngine;
use crate::scheduler::TaskStore;
use crate::sessions::ConversationStore;
use crate::settings::SettingsStore;
use crate::utils::KeyedRateLimiter;
use crate::vector::VectorStore;

/// Per-conversation running cost totals (in-memory; conversations are
/// short-lived relative to the process)
pub struct SessionCosts {
    totals: RwLock<HashMap<String, f64>>,
}

impl SessionCosts {
    pub fn new() -> Self {
        Self {
            totals: RwLock::new(HashMap::new()),
        }
    }

    /// Add a query's cost and return the session total
    pub async fn add(&self, conversation_id: &str, cost: f64) -> f64 {
        let mut totals = self.totals.write().await;
        let total = totals.entry(conversation_id.to_string()).or_insert(0.0);
        *total += cost;
        *total
    }

    pub async fn forget(&self, conversation_id: &str) {
        self.totals.write().await.remove(conversation_id);
    }
}

impl Default for SessionCosts {
    fn default() -> Self {
        Self::new()
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub pool: SqlitePool,
    pub settings: SettingsStore,
    pub entity: Arc<EntityStore>,
    pub identity_cache: IdentityCache,
    pub rag: Arc<RagEngine>,
    pub sessions: ConversationStore,
    pub tasks: TaskStore,
    pub plugins: Arc<PluginRegistry>,
    pub rate_limiter: KeyedRateLimiter,
    pub session_costs: SessionCosts,
}

impl AppState {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        CONFIG.validate()?;

        // Initialize stores; all DDL is idempotent
        let settings = SettingsStore::new(pool.clone());
        settings.init_schema().await?;

        let entity = Arc::new(EntityStore::new(pool.clone()));
        entity.init_schema().await?;

        let sessions = ConversationStore::new(pool.clone(), CONFIG.session.ttl_minutes);
        sessions.init_schema().await?;

        let tasks = TaskStore::new(pool.clone());
        tasks.init_schema().await?;

        let recordings = crate::plugins::recordings::db::RecordingStore::new(pool.clone());
        recordings.init_schema().await?;

        // Vector store: collection + payload indexes must exist before
        // any ingestion or retrieval
        info!("Connecting to Qdrant at {}", CONFIG.qdrant.url);
        let vector_store = Arc::new(
            VectorStore::new(
                &CONFIG.qdrant.url,
                &CONFIG.qdrant.collection,
                CONFIG.qdrant.vector_size,
                CONFIG.qdrant.timeout_secs,
            )
            .await?,
        );

        // Embeddings are eager (ingestion needs them); the LLM handle
        // inside the engine is lazy
        info!("Initializing embedding client ({})", CONFIG.embedding.model);
        let embeddings = Arc::new(OpenAIEmbeddings::new(
            CONFIG.embedding.api_key.clone(),
            CONFIG.embedding.model.clone(),
            CONFIG.embedding.dimensions,
        ));

        let rag = Arc::new(RagEngine::new(
            vector_store,
            embeddings,
            CONFIG.llm.clone(),
            CONFIG.retrieval.clone(),
            &CONFIG.timezone,
        ));

        let plugin_ctx = PluginContext {
            pool: pool.clone(),
            settings: settings.clone(),
            entity: entity.clone(),
            rag: rag.clone(),
        };
        let plugins = Arc::new(PluginRegistry::new(plugin_ctx));

        let rate_limiter = KeyedRateLimiter::new(CONFIG.rate_limit.requests_per_minute)?;

        info!("Application state initialized");

        Ok(Self {
            pool,
            settings,
            entity,
            identity_cache: IdentityCache::new(),
            rag,
            sessions,
            tasks,
            plugins,
            rate_limiter,
            session_costs: SessionCosts::new(),
        })
    }
}
