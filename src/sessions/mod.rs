// src/sessions/mod.rs

//! Durable conversation store: session id → ordered turns.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

/// Hard cap on retained turns per conversation; oldest are trimmed
pub const MAX_TURNS: usize = 20;

/// A rich-content attachment carried by a turn (image, calendar event,
/// button prompt). Stored as JSON and restored to presentation-ready
/// fields on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RichContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_index: i64,
    pub user_text: String,
    pub assistant_text: String,
    pub sources: serde_json::Value,
    pub rich_content: Vec<RichContent>,
    pub retrieved_ids: Vec<String>,
    pub filters: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub turn_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Conversation store with TTL pruning and a hard turn cap
#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
    ttl_minutes: i64,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool, ttl_minutes: i64) -> Self {
        Self { pool, ttl_minutes }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                turn_index INTEGER NOT NULL,
                user_text TEXT NOT NULL,
                assistant_text TEXT NOT NULL,
                sources TEXT NOT NULL DEFAULT '[]',
                rich_content TEXT NOT NULL DEFAULT '[]',
                retrieved_ids TEXT NOT NULL DEFAULT '[]',
                filters TEXT NOT NULL DEFAULT '{}',
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
                UNIQUE(conversation_id, turn_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_conversation ON conversation_turns(conversation_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ensure a conversation row exists; the first user message becomes
    /// the title.
    pub async fn ensure_conversation(&self, id: &str, title_hint: &str) -> Result<()> {
        let title: String = title_hint.chars().take(80).collect();
        sqlx::query("INSERT OR IGNORE INTO conversations (id, title) VALUES (?, ?)")
            .bind(id)
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append a turn, trimming the oldest past the cap
    pub async fn add_turn(
        &self,
        conversation_id: &str,
        user_text: &str,
        assistant_text: &str,
        sources: &serde_json::Value,
        rich_content: &[RichContent],
        retrieved_ids: &[String],
        filters: &serde_json::Value,
    ) -> Result<i64> {
        self.ensure_conversation(conversation_id, user_text).await?;

        let next_index = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(turn_index), -1) + 1 FROM conversation_turns WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_turns
                (conversation_id, turn_index, user_text, assistant_text,
                 sources, rich_content, retrieved_ids, filters)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(next_index)
        .bind(user_text)
        .bind(assistant_text)
        .bind(sources.to_string())
        .bind(serde_json::to_string(rich_content)?)
        .bind(serde_json::to_string(retrieved_ids)?)
        .bind(filters.to_string())
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        // Trim oldest turns past the cap
        sqlx::query(
            r#"
            DELETE FROM conversation_turns
            WHERE conversation_id = ?
              AND turn_index <= (
                  SELECT MAX(turn_index) FROM conversation_turns WHERE conversation_id = ?
              ) - ?
            "#,
        )
        .bind(conversation_id)
        .bind(conversation_id)
        .bind(MAX_TURNS as i64)
        .execute(&self.pool)
        .await?;

        debug!("Added turn {} to conversation {}", next_index, conversation_id);
        Ok(next_index)
    }

    /// Ordered turns of a conversation, rich content restored from JSON
    pub async fn get_turns(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT turn_index, user_text, assistant_text, sources,
                   rich_content, retrieved_ids, filters, created_at
            FROM conversation_turns
            WHERE conversation_id = ?
            ORDER BY turn_index
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ConversationTurn {
                turn_index: r.get("turn_index"),
                user_text: r.get("user_text"),
                assistant_text: r.get("assistant_text"),
                sources: serde_json::from_str(&r.get::<String, _>("sources"))
                    .unwrap_or(serde_json::Value::Array(vec![])),
                rich_content: serde_json::from_str(&r.get::<String, _>("rich_content"))
                    .unwrap_or_default(),
                retrieved_ids: serde_json::from_str(&r.get::<String, _>("retrieved_ids"))
                    .unwrap_or_default(),
                filters: serde_json::from_str(&r.get::<String, _>("filters"))
                    .unwrap_or(serde_json::Value::Object(Default::default())),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.title, c.created_at, c.updated_at,
                   (SELECT COUNT(*) FROM conversation_turns t WHERE t.conversation_id = c.id) as turn_count
            FROM conversations c
            ORDER BY c.updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ConversationSummary {
                id: r.get("id"),
                title: r.get("title"),
                turn_count: r.get("turn_count"),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            })
            .collect())
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete conversations idle past the TTL. Driven by a background
    /// tick.
    pub async fn prune_expired(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::minutes(self.ttl_minutes);
        let result = sqlx::query("DELETE FROM conversations WHERE updated_at < ?")
            .bind(cutoff.format("%Y-%m-%d %H:%M:%S").to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            info!("Pruned {} expired conversations", result.rows_affected());
        }
        Ok(result.rows_affected())
    }
}
