// src/plugins/paperless/mod.rs
// Pull-style document management channel

pub mod client;
pub mod sync;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::api::error::ApiError;
use crate::settings::{SettingSpec, SettingType};
use crate::state::AppState;

use super::{ChannelPlugin, PluginContext, SyncReport};

use client::PaperlessClient;

pub struct PaperlessPlugin {
    is_syncing: Arc<AtomicBool>,
    last_sync: AtomicI64,
    last_report: Mutex<Option<SyncReport>>,
}

impl PaperlessPlugin {
    pub fn new() -> Self {
        Self {
            is_syncing: Arc::new(AtomicBool::new(false)),
            last_sync: AtomicI64::new(0),
            last_report: Mutex::new(None),
        }
    }

    async fn build_client(&self, ctx: &PluginContext) -> Result<PaperlessClient> {
        let base_url = ctx.settings.get_or("paperless_api_url", "").await;
        let token = ctx.settings.get_or("paperless_api_token", "").await;
        if base_url.is_empty() {
            return Err(anyhow!("paperless_api_url is not configured"));
        }
        Ok(PaperlessClient::new(base_url, token))
    }

    pub async fn run_sync(&self, ctx: &PluginContext, force: bool) -> Result<SyncReport> {
        if self.is_syncing.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("A sync is already running"));
        }

        let result = async {
            let client = self.build_client(ctx).await?;
            let max_items = ctx.settings.get_int("paperless_max_items", 100).await as usize;
            sync::sync_documents(ctx, &client, max_items, force, &self.is_syncing).await
        }
        .await;

        self.is_syncing.store(false, Ordering::SeqCst);

        match result {
            Ok(report) => {
                self.last_sync
                    .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
                *self.last_report.lock().await = Some(report.clone());
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn status(&self) -> serde_json::Value {
        json!({
            "is_syncing": self.is_syncing.load(Ordering::Relaxed),
            "last_sync_time": self.last_sync.load(Ordering::Relaxed),
            "last_report": *self.last_report.lock().await,
        })
    }
}

impl Default for PaperlessPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelPlugin for PaperlessPlugin {
    fn name(&self) -> &'static str {
        "paperless"
    }

    fn display_name(&self) -> &'static str {
        "Paperless"
    }

    fn icon(&self) -> &'static str {
        "📄"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn default_settings(&self) -> Vec<SettingSpec> {
        vec![
            SettingSpec {
                key: "paperless_api_url",
                default: "",
                category: "paperless",
                setting_type: SettingType::Text,
                description: "Base URL of the Paperless instance",
            },
            SettingSpec {
                key: "paperless_api_token",
                default: "",
                category: "paperless",
                setting_type: SettingType::Secret,
                description: "API token for Paperless",
            },
            SettingSpec {
                key: "paperless_max_items",
                default: "100",
                category: "paperless",
                setting_type: SettingType::Int,
                description: "Maximum documents per sync run",
            },
        ]
    }

    fn env_key_map(&self) -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("paperless_api_url", "PAPERLESS_API_URL"),
            ("paperless_api_token", "PAPERLESS_API_TOKEN"),
        ])
    }

    async fn initialize(&self, ctx: &PluginContext) -> Result<()> {
        match self.build_client(ctx).await {
            Ok(_) => info!("Paperless plugin initialized"),
            Err(e) => info!("Paperless plugin initialized without client: {}", e),
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.is_syncing.store(false, Ordering::SeqCst);
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/sync", post(trigger_sync))
            .route("/sync/status", get(sync_status))
            .route("/test", get(test))
    }

    async fn health_check(&self, ctx: &PluginContext) -> HashMap<String, String> {
        let status = match self.build_client(ctx).await {
            Ok(client) => match client.ping().await {
                Ok(()) => "connected".to_string(),
                Err(e) => format!("error: {}", e),
            },
            Err(e) => format!("error: {}", e),
        };
        HashMap::from([("paperless_api".to_string(), status)])
    }
}

#[derive(Deserialize)]
struct SyncParams {
    #[serde(default)]
    force: bool,
}

async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SyncParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.plugins.is_enabled("paperless").await {
        return Err(ApiError::bad_request(anyhow!("Plugin is disabled")));
    }
    let plugin = state.plugins.paperless.clone();
    let ctx = state.plugins.context().clone();

    tokio::spawn(async move {
        if let Err(e) = plugin.run_sync(&ctx, params.force).await {
            error!("Document sync failed: {}", e);
        }
    });

    Ok(Json(json!({"status": "started"})))
}

async fn sync_status(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.plugins.paperless.status().await))
}

async fn test(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let health = match state.plugins.get_plugin("paperless") {
        Some(plugin) => plugin.health_check(state.plugins.context()).await,
        None => HashMap::new(),
    };
    Json(json!({"plugin": "paperless", "dependencies": health}))
}
