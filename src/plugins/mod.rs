// src/plugins/mod.rs

//! Channel plugin runtime: the plugin trait, the build-time registry,
//! and the channel implementations.

pub mod mailbox;
pub mod paperless;
pub mod recordings;
pub mod registry;
pub mod whatsapp;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::EntityStore;
use crate::rag::{RagDocument, RagEngine};
use crate::settings::{SettingSpec, SettingsStore};
use crate::state::AppState;

pub use registry::PluginRegistry;

/// Services handed to plugins at initialization and during processing
#[derive(Clone)]
pub struct PluginContext {
    pub pool: SqlitePool,
    pub settings: SettingsStore,
    pub entity: Arc<EntityStore>,
    pub rag: Arc<RagEngine>,
}

/// Counters reported by one sync run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub skipped: usize,
    pub errors: usize,
    pub marked_processed: usize,
    pub attachments: usize,
    pub force: bool,
}

/// Interface all channel plugins implement.
///
/// Lifecycle: the registry enumerates plugins at startup, registers
/// their settings (insert-if-absent), then initializes the enabled ones.
/// Route groups mount at `/plugins/<name>/` and stay mounted; a disabled
/// plugin no-ops its webhook handler instead.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Unique identifier (lowercase, no spaces). Used as the settings
    /// category, the route prefix and the `plugin_<name>_enabled` key.
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn icon(&self) -> &'static str;

    fn version(&self) -> &'static str;

    fn description(&self) -> String {
        format!("{} integration plugin", self.display_name())
    }

    /// Default settings registered on discovery. Existing user-edited
    /// values are preserved.
    fn default_settings(&self) -> Vec<SettingSpec>;

    /// Allowed values for select-typed settings
    fn select_options(&self) -> HashMap<&'static str, Vec<&'static str>> {
        HashMap::new()
    }

    /// Setting key → environment variable used for first-run seeding
    fn env_key_map(&self) -> HashMap<&'static str, &'static str> {
        HashMap::new()
    }

    /// Category metadata driving settings-UI grouping
    fn category_meta(&self) -> (String, String) {
        (format!("{} {}", self.icon(), self.display_name()), "10".to_string())
    }

    /// Called when the plugin is enabled (at startup or at runtime).
    /// Misconfiguration must not fail startup: return Err and the
    /// registry logs and continues, leaving health_check to report it.
    async fn initialize(&self, ctx: &PluginContext) -> Result<()>;

    /// Called when the plugin is disabled or at shutdown
    async fn shutdown(&self);

    /// Plugin-owned route group, mounted at `/plugins/<name>/`
    fn routes(&self) -> Router<Arc<AppState>>;

    /// Per-dependency connectivity: "connected" or "error: ..."
    async fn health_check(&self, ctx: &PluginContext) -> HashMap<String, String>;

    /// Parse a push payload into a document, or None to drop it.
    /// Pull-style plugins keep the default.
    async fn process_webhook(
        &self,
        _ctx: &PluginContext,
        _payload: serde_json::Value,
    ) -> Result<Option<RagDocument>> {
        Ok(None)
    }
}
