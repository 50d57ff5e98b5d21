// src/settings/mod.rs
// Typed settings store backing the plugin runtime and the UI

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, info};

/// Declared value type of a setting; all values are strings on disk and
/// parsed on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    Text,
    Secret,
    Int,
    Float,
    Bool,
    Select,
}

impl SettingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::Text => "text",
            SettingType::Secret => "secret",
            SettingType::Int => "int",
            SettingType::Float => "float",
            SettingType::Bool => "bool",
            SettingType::Select => "select",
        }
    }
}

/// A default setting declared by a plugin or the core
#[derive(Debug, Clone)]
pub struct SettingSpec {
    pub key: &'static str,
    pub default: &'static str,
    pub category: &'static str,
    pub setting_type: SettingType,
    pub description: &'static str,
}

/// A stored setting row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub category: String,
    pub setting_type: String,
    pub description: String,
}

/// Settings store over SQLite. Registration uses insert-if-absent so
/// user-edited values survive restarts and plugin upgrades.
#[derive(Clone)]
pub struct SettingsStore {
    pool: SqlitePool,
}

impl SettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plugin_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT 'general',
                type TEXT NOT NULL DEFAULT 'text',
                description TEXT NOT NULL DEFAULT '',
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Register defaults with insert-if-absent semantics. When the key is
    /// new and an env var is mapped for it, the env value overlays the
    /// default (first-run seeding).
    pub async fn register_defaults(
        &self,
        specs: &[SettingSpec],
        env_map: &HashMap<&str, &str>,
    ) -> Result<()> {
        for spec in specs {
            let value = env_map
                .get(spec.key)
                .and_then(|var| std::env::var(var).ok())
                .unwrap_or_else(|| spec.default.to_string());

            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO plugin_settings (key, value, category, type, description)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(spec.key)
            .bind(&value)
            .bind(spec.category)
            .bind(spec.setting_type.as_str())
            .bind(spec.description)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                debug!("Registered setting {} = {:?}", spec.key, spec.setting_type);
            }
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value =
            sqlx::query_scalar::<_, String>("SELECT value FROM plugin_settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    pub async fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| default.to_string())
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).await.ok().flatten() {
            Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            None => default,
        }
    }

    pub async fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub async fn get_float(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO plugin_settings (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        info!("Setting updated: {}", key);
        Ok(())
    }

    /// All settings grouped by category, with secret values masked
    pub async fn list(&self) -> Result<Vec<SettingRow>> {
        let rows = sqlx::query(
            "SELECT key, value, category, type, description FROM plugin_settings ORDER BY category, key",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let setting_type: String = r.get("type");
                let value: String = r.get("value");
                SettingRow {
                    key: r.get("key"),
                    value: if setting_type == "secret" && !value.is_empty() {
                        "********".to_string()
                    } else {
                        value
                    },
                    category: r.get("category"),
                    setting_type,
                    description: r.get("description"),
                }
            })
            .collect())
    }
}
