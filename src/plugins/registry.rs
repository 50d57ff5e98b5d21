// src/plugins/registry.rs
// Build-time plugin registry and lifecycle management

use anyhow::{anyhow, Result};
use axum::Router;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::settings::{SettingSpec, SettingType};
use crate::state::AppState;

use super::{mailbox, paperless, recordings, whatsapp, ChannelPlugin, PluginContext};

fn enabled_key(name: &str) -> String {
    format!("plugin_{}_enabled", name)
}

/// Owns plugin discovery, settings registration, lifecycle and health
/// aggregation.
///
/// Plugins register at build time: adding a channel means constructing
/// it in `new` and pushing it onto the list; there is no filesystem
/// scanning. Typed handles stay available for plugin-owned routes.
pub struct PluginRegistry {
    pub whatsapp: Arc<whatsapp::WhatsappPlugin>,
    pub mailbox: Arc<mailbox::MailboxPlugin>,
    pub paperless: Arc<paperless::PaperlessPlugin>,
    pub recordings: Arc<recordings::RecordingsPlugin>,
    plugins: Vec<Arc<dyn ChannelPlugin>>,
    enabled: RwLock<HashSet<String>>,
    ctx: PluginContext,
}

impl PluginRegistry {
    pub fn new(ctx: PluginContext) -> Self {
        let whatsapp = Arc::new(whatsapp::WhatsappPlugin::new());
        let mailbox = Arc::new(mailbox::MailboxPlugin::new());
        let paperless = Arc::new(paperless::PaperlessPlugin::new());
        let recordings = Arc::new(recordings::RecordingsPlugin::new());

        let plugins: Vec<Arc<dyn ChannelPlugin>> = vec![
            whatsapp.clone(),
            mailbox.clone(),
            paperless.clone(),
            recordings.clone(),
        ];

        Self {
            whatsapp,
            mailbox,
            paperless,
            recordings,
            plugins,
            enabled: RwLock::new(HashSet::new()),
            ctx,
        }
    }

    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn ChannelPlugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub async fn is_enabled(&self, name: &str) -> bool {
        self.enabled.read().await.contains(name)
    }

    /// Register every plugin's settings (insert-if-absent, env overlay on
    /// first run) plus its enabled flag.
    pub async fn register_settings(&self) -> Result<()> {
        for plugin in &self.plugins {
            let mut specs = plugin.default_settings();
            // The enabled flag is a registry-owned setting; leak is fine,
            // the keys live for the process lifetime
            let key: &'static str = Box::leak(enabled_key(plugin.name()).into_boxed_str());
            specs.push(SettingSpec {
                key,
                default: "false",
                category: plugin.name(),
                setting_type: SettingType::Bool,
                description: "Enable this channel plugin",
            });

            let env_map: HashMap<&str, &str> = plugin.env_key_map();
            self.ctx.settings.register_defaults(&specs, &env_map).await?;
            info!(
                "Discovered plugin: {} {} v{}",
                plugin.icon(),
                plugin.display_name(),
                plugin.version()
            );
        }
        Ok(())
    }

    /// Initialize every plugin whose enabled flag is set. A failing
    /// plugin logs and stays out of the enabled set; startup continues.
    pub async fn load_enabled(&self) {
        for plugin in &self.plugins {
            let name = plugin.name();
            if !self.ctx.settings.get_bool(&enabled_key(name), false).await {
                continue;
            }
            match plugin.initialize(&self.ctx).await {
                Ok(()) => {
                    self.enabled.write().await.insert(name.to_string());
                    info!("Plugin enabled: {}", name);
                }
                Err(e) => {
                    error!("Plugin {} failed to initialize: {}", name, e);
                }
            }
        }
    }

    /// Enable a plugin at runtime and persist the flag
    pub async fn enable_plugin(&self, name: &str) -> Result<()> {
        let plugin = self
            .get_plugin(name)
            .ok_or_else(|| anyhow!("Unknown plugin: {}", name))?;
        plugin.initialize(&self.ctx).await?;
        self.enabled.write().await.insert(name.to_string());
        self.ctx.settings.set(&enabled_key(name), "true").await?;
        info!("Plugin enabled at runtime: {}", name);
        Ok(())
    }

    /// Disable a plugin at runtime and persist the flag. Its routes stay
    /// mounted; the webhook path no-ops.
    pub async fn disable_plugin(&self, name: &str) -> Result<()> {
        let plugin = self
            .get_plugin(name)
            .ok_or_else(|| anyhow!("Unknown plugin: {}", name))?;
        plugin.shutdown().await;
        self.enabled.write().await.remove(name);
        self.ctx.settings.set(&enabled_key(name), "false").await?;
        info!("Plugin disabled: {}", name);
        Ok(())
    }

    /// Shut down all enabled plugins (process exit)
    pub async fn shutdown_all(&self) {
        let enabled = self.enabled.read().await.clone();
        for plugin in &self.plugins {
            if enabled.contains(plugin.name()) {
                plugin.shutdown().await;
            }
        }
    }

    /// Aggregate per-plugin health. Disabled plugins report as such
    /// without probing their dependencies.
    pub async fn health_check_all(&self) -> HashMap<String, HashMap<String, String>> {
        let mut all = HashMap::new();
        for plugin in &self.plugins {
            let name = plugin.name().to_string();
            if self.is_enabled(&name).await {
                all.insert(name, plugin.health_check(&self.ctx).await);
            } else {
                let mut status = HashMap::new();
                status.insert("plugin".to_string(), "disabled".to_string());
                all.insert(name, status);
            }
        }
        all
    }

    /// Route a webhook payload to a plugin. Disabled plugins drop the
    /// payload silently.
    pub async fn process_webhook(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<Option<crate::rag::RagDocument>> {
        let plugin = self
            .get_plugin(name)
            .ok_or_else(|| anyhow!("Unknown plugin: {}", name))?;
        if !self.is_enabled(name).await {
            warn!("Webhook for disabled plugin {} dropped", name);
            return Ok(None);
        }
        plugin.process_webhook(&self.ctx, payload).await
    }

    /// Merged router of every plugin's route group, each nested under
    /// /plugins/<name>. Mounted once at startup.
    pub fn routes(&self) -> Router<Arc<AppState>> {
        let mut router = Router::new();
        for plugin in &self.plugins {
            router = router.nest(&format!("/plugins/{}", plugin.name()), plugin.routes());
        }
        router
    }

    /// Discovery metadata for the plugins list endpoint, including the
    /// category metadata and select options that drive UI grouping
    pub async fn discovered(&self) -> Vec<serde_json::Value> {
        let mut list = Vec::with_capacity(self.plugins.len());
        for plugin in &self.plugins {
            let (category_label, category_order) = plugin.category_meta();
            list.push(serde_json::json!({
                "name": plugin.name(),
                "display_name": plugin.display_name(),
                "icon": plugin.icon(),
                "version": plugin.version(),
                "description": plugin.description(),
                "enabled": self.is_enabled(plugin.name()).await,
                "category_label": category_label,
                "category_order": category_order,
                "select_options": plugin.select_options(),
            }));
        }
        list
    }
}
