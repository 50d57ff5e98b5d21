// src/plugins/whatsapp/mod.rs
// Push-style chat channel fed by gateway webhooks

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::error::ApiError;
use crate::entity::ContactSeed;
use crate::rag::{ChannelExtras, ContentType, DocumentSource, RagDocument};
use crate::settings::{SettingSpec, SettingType};
use crate::state::AppState;

use super::{ChannelPlugin, PluginContext};

/// Incoming message webhook, as the chat gateway posts it
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(default)]
    event: String,
    #[serde(default)]
    payload: MessagePayload,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePayload {
    /// Chat id the message arrived in ("<digits>@c.us" or "<id>@g.us")
    #[serde(default)]
    from: String,
    /// Actual sender inside a group chat
    #[serde(default)]
    participant: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    timestamp: i64,
    #[serde(default, rename = "fromMe")]
    from_me: bool,
    #[serde(default, rename = "chatName")]
    chat_name: Option<String>,
    #[serde(default, rename = "senderName")]
    sender_name: Option<String>,
    #[serde(default, rename = "hasMedia")]
    has_media: bool,
    #[serde(default)]
    media: Option<MediaPayload>,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    #[serde(default)]
    mimetype: Option<String>,
}

pub struct WhatsappPlugin;

impl WhatsappPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WhatsappPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Digits of a "<digits>@c.us" id are the phone number; linked ids
/// ("@lid") are not.
fn phone_from_chat_id(id: &str) -> Option<String> {
    let digits = id.strip_suffix("@c.us")?;
    if digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits.to_string())
    } else {
        None
    }
}

#[async_trait]
impl ChannelPlugin for WhatsappPlugin {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    fn display_name(&self) -> &'static str {
        "WhatsApp"
    }

    fn icon(&self) -> &'static str {
        "💬"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn default_settings(&self) -> Vec<SettingSpec> {
        vec![
            SettingSpec {
                key: "whatsapp_gateway_url",
                default: "http://localhost:3000",
                category: "whatsapp",
                setting_type: SettingType::Text,
                description: "Base URL of the WhatsApp gateway",
            },
            SettingSpec {
                key: "whatsapp_gateway_api_key",
                default: "",
                category: "whatsapp",
                setting_type: SettingType::Secret,
                description: "API key for the WhatsApp gateway",
            },
            SettingSpec {
                key: "whatsapp_session_name",
                default: "default",
                category: "whatsapp",
                setting_type: SettingType::Text,
                description: "Gateway session name",
            },
        ]
    }

    fn env_key_map(&self) -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("whatsapp_gateway_url", "WHATSAPP_GATEWAY_URL"),
            ("whatsapp_gateway_api_key", "WHATSAPP_GATEWAY_API_KEY"),
            ("whatsapp_session_name", "WHATSAPP_SESSION_NAME"),
        ])
    }

    async fn initialize(&self, _ctx: &PluginContext) -> Result<()> {
        info!("WhatsApp plugin initialized");
        Ok(())
    }

    async fn shutdown(&self) {}

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/webhook", post(webhook))
            .route("/seed-contacts", post(seed_contacts))
            .route("/test", get(test))
    }

    async fn health_check(&self, ctx: &PluginContext) -> HashMap<String, String> {
        let url = ctx
            .settings
            .get_or("whatsapp_gateway_url", "http://localhost:3000")
            .await;
        let status = match reqwest::Client::new()
            .get(format!("{}/api/health", url))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => "connected".to_string(),
            Ok(resp) => format!("error: gateway returned {}", resp.status()),
            Err(e) => format!("error: {}", e),
        };
        HashMap::from([("gateway".to_string(), status)])
    }

    /// Turn a message webhook into a document: resolves the sender in the
    /// entity store, links the asset, and buffers the message for
    /// conversation chunking.
    async fn process_webhook(
        &self,
        ctx: &PluginContext,
        payload: serde_json::Value,
    ) -> Result<Option<RagDocument>> {
        let envelope: WebhookEnvelope = serde_json::from_value(payload)?;
        if !envelope.event.is_empty() && envelope.event != "message" {
            debug!("Ignoring webhook event: {}", envelope.event);
            return Ok(None);
        }

        let msg = envelope.payload;
        if msg.body.trim().is_empty() || msg.from.is_empty() {
            return Ok(None);
        }

        let is_group = msg.from.ends_with("@g.us");
        let sender_id = msg
            .participant
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| msg.from.clone());
        let sender_name = msg
            .sender_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| sender_id.clone());
        let chat_name = msg
            .chat_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| {
                if is_group {
                    msg.from.clone()
                } else {
                    sender_name.clone()
                }
            });

        let source_id = format!("{}:{}", msg.from, msg.timestamp);

        // Resolve the sender in the entity graph and link the message.
        // The LID guard inside get_or_create_person keeps linked-id
        // digits out of the phone column.
        if !msg.from_me {
            let phone = phone_from_chat_id(&sender_id);
            match ctx
                .entity
                .get_or_create_person(&sender_name, Some(&sender_id), phone.as_deref(), None, false)
                .await
            {
                Ok(person_id) => {
                    if let Err(e) = ctx
                        .entity
                        .link_person_asset(person_id, "whatsapp_msg", &source_id, "sender", 1.0)
                        .await
                    {
                        warn!("Failed to link sender to message: {}", e);
                    }
                }
                Err(e) => warn!("Failed to resolve sender {}: {}", sender_name, e),
            }
        }

        // Thread membership edge for the chat
        let thread_ref = format!("thread:{}", msg.from);
        if let Err(e) = ctx
            .entity
            .link_assets(&source_id, &thread_ref, "thread_member", 1.0, Some("webhook"))
            .await
        {
            warn!("Failed to add thread edge: {}", e);
        }

        // Buffer for conversation chunking
        ctx.rag
            .buffer_message(
                &msg.from,
                &chat_name,
                is_group,
                &sender_name,
                &msg.body,
                msg.timestamp,
            )
            .await;

        Ok(Some(RagDocument {
            source: DocumentSource::Whatsapp,
            source_id,
            content_type: ContentType::Message,
            chat_name,
            sender: sender_name,
            timestamp: msg.timestamp,
            is_group,
            text: msg.body,
            embedding_header: None,
            extras: ChannelExtras::Whatsapp {
                chat_id: msg.from,
                has_media: msg.has_media,
                media_type: msg.media.and_then(|m| m.mimetype),
            },
        }))
    }
}

async fn webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let doc = state
        .plugins
        .process_webhook("whatsapp", payload)
        .await
        .map_err(ApiError::bad_request)?;

    match doc {
        Some(doc) => {
            let outcome = state
                .rag
                .add_document(&doc)
                .await
                .map_err(ApiError::internal)?;
            Ok(Json(json!({
                "status": "ok",
                "stored": !outcome.skipped,
            })))
        }
        None => Ok(Json(json!({"status": "ignored"}))),
    }
}

async fn seed_contacts(
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

async fn test(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let health = match state.plugins.get_plugin("whatsapp") {
        Some(plugin) => plugin.health_check(state.plugins.context()).await,
        None => HashMap::new(),
    };
    Json(json!({"plugin": "whatsapp", "dependencies": health}))
}
