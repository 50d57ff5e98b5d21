// src/plugins/recordings/mod.rs
// Pull-style call-recording channel with a review-and-approve workflow

pub mod db;
pub mod scanner;
pub mod sync;
pub mod transcriber;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    extract::{Path as AxumPath, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::api::error::ApiError;
use crate::settings::{SettingSpec, SettingType};
use crate::state::AppState;

use super::{ChannelPlugin, PluginContext};

use db::RecordingStore;
use transcriber::HttpTranscriber;

pub struct RecordingsPlugin {
    is_syncing: Arc<AtomicBool>,
    last_sync: AtomicI64,
    /// Audio transcription is CPU/GPU-bound; one job at a time
    transcribe_pool: Arc<Semaphore>,
}

impl RecordingsPlugin {
    pub fn new() -> Self {
        Self {
            is_syncing: Arc::new(AtomicBool::new(false)),
            last_sync: AtomicI64::new(0),
            transcribe_pool: Arc::new(Semaphore::new(1)),
        }
    }

    fn store(&self, ctx: &PluginContext) -> RecordingStore {
        RecordingStore::new(ctx.pool.clone())
    }

    async fn transcriber(&self, ctx: &PluginContext) -> Result<HttpTranscriber> {
        let url = ctx.settings.get_or("recordings_transcriber_url", "").await;
        if url.is_empty() {
            return Err(anyhow!("recordings_transcriber_url is not configured"));
        }
        Ok(HttpTranscriber::new(url))
    }

    async fn recordings_dir(&self, ctx: &PluginContext) -> Result<PathBuf> {
        let dir = ctx.settings.get_or("recordings_dir", "").await;
        if dir.is_empty() {
            return Err(anyhow!("recordings_dir is not configured"));
        }
        Ok(PathBuf::from(dir))
    }

    /// Queue a transcription through the single-worker pool
    fn spawn_transcription(&self, ctx: PluginContext, content_hash: String) {
        let pool = self.transcribe_pool.clone();
        let store = self.store(&ctx);
        tokio::spawn(async move {
            let _permit = match pool.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let url = ctx.settings.get_or("recordings_transcriber_url", "").await;
            if url.is_empty() {
                warn!("Transcriber not configured, skipping {}", content_hash);
                return;
            }
            let transcriber = HttpTranscriber::new(url);
            if let Err(e) = sync::transcribe_file(&store, &transcriber, &content_hash).await {
                warn!("Transcription of {} failed: {}", content_hash, e);
            }
        });
    }

    /// One scan-and-sync run: register new files, optionally queue
    /// transcriptions, and restore approved recordings after a reset.
    pub async fn run_sync(&self, ctx: &PluginContext, force: bool) -> Result<serde_json::Value> {
        if self.is_syncing.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("A sync is already running"));
        }

        let result = async {
            let store = self.store(ctx);
            store.init_schema().await?;
            let dir = self.recordings_dir(ctx).await?;

            let scan = sync::scan_and_register(&store, &dir, sync::STALE_TRANSCRIBING_MINUTES).await?;

            let mut force = force;
            if !force {
                if let Ok(0) = ctx.rag.vector_store().total_count().await {
                    info!("Vector collection is empty, enabling force mode for recordings");
                    force = true;
                }
            }
            let reindexed = sync::reindex_approved(ctx, &store, force).await?;

            if ctx.settings.get_bool("recordings_auto_transcribe", true).await {
                let pending = store.list_files(Some("pending"), 100).await?;
                for file in &pending {
                    self.spawn_transcription(ctx.clone(), file.content_hash.clone());
                }
                info!("Queued {} pending transcriptions", pending.len());
            }

            Ok::<_, anyhow::Error>(json!({
                "scanned": scan.scanned,
                "new_files": scan.new_files,
                "stale_reset": scan.stale_reset,
                "reindexed": reindexed,
                "force": force,
                "counts": store.get_counts().await?,
            }))
        }
        .await;

        self.is_syncing.store(false, Ordering::SeqCst);
        if result.is_ok() {
            self.last_sync
                .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
        }
        result
    }
}

impl Default for RecordingsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelPlugin for RecordingsPlugin {
    fn name(&self) -> &'static str {
        "recordings"
    }

    fn display_name(&self) -> &'static str {
        "Call Recordings"
    }

    fn icon(&self) -> &'static str {
        "📞"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn default_settings(&self) -> Vec<SettingSpec> {
        vec![
            SettingSpec {
                key: "recordings_dir",
                default: "",
                category: "recordings",
                setting_type: SettingType::Text,
                description: "Directory scanned for call recordings",
            },
            SettingSpec {
                key: "recordings_transcriber_url",
                default: "http://localhost:9000",
                category: "recordings",
                setting_type: SettingType::Text,
                description: "Base URL of the transcription service",
            },
            SettingSpec {
                key: "recordings_auto_transcribe",
                default: "true",
                category: "recordings",
                setting_type: SettingType::Bool,
                description: "Automatically transcribe newly found recordings",
            },
            SettingSpec {
                key: "recordings_language_hint",
                default: "auto",
                category: "recordings",
                setting_type: SettingType::Select,
                description: "Language hint passed to the transcriber",
            },
        ]
    }

    fn select_options(&self) -> HashMap<&'static str, Vec<&'static str>> {
        HashMap::from([("recordings_language_hint", vec!["auto", "he", "en"])])
    }

    fn env_key_map(&self) -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("recordings_dir", "RECORDINGS_DIR"),
            ("recordings_transcriber_url", "RECORDINGS_TRANSCRIBER_URL"),
        ])
    }

    async fn initialize(&self, ctx: &PluginContext) -> Result<()> {
        self.store(ctx).init_schema().await?;
        info!("Recordings plugin initialized");
        Ok(())
    }

    async fn shutdown(&self) {
        self.is_syncing.store(false, Ordering::SeqCst);
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/sync", post(trigger_sync))
            .route("/sync/status", get(sync_status))
            .route("/files", get(list_files))
            .route("/files/{hash}/transcribe", post(transcribe_one))
            .route("/files/{hash}/approve", post(approve_one))
            .route("/files/{hash}", delete(delete_one))
            .route("/test", get(test))
    }

    async fn health_check(&self, ctx: &PluginContext) -> HashMap<String, String> {
        let mut status = HashMap::new();

        status.insert(
            "recordings_dir".to_string(),
            match self.recordings_dir(ctx).await {
                Ok(dir) if dir.is_dir() => "connected".to_string(),
                Ok(dir) => format!("error: {} is not a directory", dir.display()),
                Err(e) => format!("error: {}", e),
            },
        );

        status.insert(
            "transcriber".to_string(),
            match self.transcriber(ctx).await {
                Ok(t) => match t.ping().await {
                    Ok(()) => "connected".to_string(),
                    Err(e) => format!("error: {}", e),
                },
                Err(e) => format!("error: {}", e),
            },
        );

        status
    }
}

#[derive(Deserialize)]
struct SyncParams {
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
struct ListParams {
    status: Option<String>,
}

async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SyncParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.plugins.is_enabled("recordings").await {
        return Err(ApiError::bad_request(anyhow!("Plugin is disabled")));
    }
    let plugin = state.plugins.recordings.clone();
    let ctx = state.plugins.context().clone();

    tokio::spawn(async move {
        if let Err(e) = plugin.run_sync(&ctx, params.force).await {
            error!("Recordings sync failed: {}", e);
        }
    });

    Ok(Json(json!({"status": "started"})))
}

async fn sync_status(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let plugin = &state.plugins.recordings;
    let store = plugin.store(state.plugins.context());
    let counts = store.get_counts().await.map_err(ApiError::internal)?;
    Ok(Json(json!({
        "is_syncing": plugin.is_syncing.load(Ordering::Relaxed),
        "last_sync_time": plugin.last_sync.load(Ordering::Relaxed),
        "counts": counts,
    })))
}

async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let store = state.plugins.recordings.store(state.plugins.context());
    let files = store
        .list_files(params.status.as_deref(), 500)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"files": files})))
}

async fn transcribe_one(
    State(state): State<Arc<AppState>>,
    AxumPath(hash): AxumPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let plugin = state.plugins.recordings.clone();
    let ctx = state.plugins.context().clone();
    plugin.spawn_transcription(ctx, hash.clone());
    Ok(Json(json!({"status": "queued", "content_hash": hash})))
}

async fn approve_one(
    State(state): State<Arc<AppState>>,
    AxumPath(hash): AxumPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = state.plugins.context();
    let store = state.plugins.recordings.store(ctx);
    let outcome = sync::approve_file(ctx, &store, &hash, false)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(Json(outcome))
}

async fn delete_one(
    State(state): State<Arc<AppState>>,
    AxumPath(hash): AxumPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = state.plugins.context();
    let store = state.plugins.recordings.store(ctx);

    // Remove indexed points first (all chunks carry the content_hash
    // payload field), then the status row
    if let Ok(Some(file)) = store.get_file(&hash).await {
        if file.source_id.is_some() {
            let filter = qdrant_client::qdrant::Filter::must([crate::vector::match_keyword(
                "content_hash",
                &hash,
            )]);
            if let Err(e) = state.rag.vector_store().delete_by_filter(filter).await {
                warn!("Failed to delete recording points: {}", e);
            }
        }
    }

    let deleted = store.delete_file(&hash).await.map_err(ApiError::internal)?;
    Ok(Json(json!({"deleted": deleted})))
}

async fn test(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let health = match state.plugins.get_plugin("recordings") {
        Some(plugin) => plugin.health_check(state.plugins.context()).await,
        None => HashMap::new(),
    };
    Json(json!({"plugin": "recordings", "dependencies": health}))
}
