// src/plugins/recordings/db.rs
// Status tracking for call recording files
//
// Status flow: pending → transcribing → transcribed → approved | error

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct RecordingFile {
    pub content_hash: String,
    pub file_path: String,
    pub filename: String,
    pub size_bytes: i64,
    pub modified_at: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub transcript: Option<String>,
    pub language: Option<String>,
    pub duration_secs: Option<f64>,
    pub progress_message: Option<String>,
    pub transcribe_started_at: Option<String>,
    pub participants: Option<String>,
    pub contact_name: Option<String>,
    pub phone_number: Option<String>,
    pub source_id: Option<String>,
}

#[derive(Clone)]
pub struct RecordingStore {
    pool: SqlitePool,
}

impl RecordingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recording_files (
                content_hash TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                filename TEXT NOT NULL,
                size_bytes INTEGER DEFAULT 0,
                modified_at INTEGER DEFAULT 0,
                status TEXT DEFAULT 'pending',
                error_message TEXT,
                error_type TEXT,
                transcript TEXT,
                language TEXT,
                duration_secs REAL,
                progress_message TEXT,
                transcribe_started_at TIMESTAMP,
                participants TEXT,
                contact_name TEXT,
                phone_number TEXT,
                source_id TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_recording_status ON recording_files(status)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register a newly discovered file as pending. Re-registration of a
    /// known hash is a no-op.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_file(
        &self,
        content_hash: &str,
        file_path: &str,
        filename: &str,
        size_bytes: i64,
        modified_at: i64,
        contact_name: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO recording_files
                (content_hash, file_path, filename, size_bytes, modified_at,
                 status, contact_name, phone_number)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(content_hash)
        .bind(file_path)
        .bind(filename)
        .bind(size_bytes)
        .bind(modified_at)
        .bind(contact_name)
        .bind(phone_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_file(&self, content_hash: &str) -> Result<Option<RecordingFile>> {
        let file = sqlx::query_as::<_, RecordingFile>(
            "SELECT * FROM recording_files WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    pub async fn list_files(
        &self,
        status: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RecordingFile>> {
        let files = match status {
            Some(s) => {
                sqlx::query_as::<_, RecordingFile>(
                    "SELECT * FROM recording_files WHERE status = ? ORDER BY modified_at DESC LIMIT ?",
                )
                .bind(s)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RecordingFile>(
                    "SELECT * FROM recording_files ORDER BY modified_at DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(files)
    }

    /// Update a file's status. Entering 'transcribing' records the start
    /// timestamp; leaving it clears the progress fields.
    pub async fn update_status(
        &self,
        content_hash: &str,
        status: &str,
        error_message: Option<&str>,
        error_type: Option<&str>,
    ) -> Result<()> {
        if status == "transcribing" {
            sqlx::query(
                r#"
                UPDATE recording_files
                SET status = ?, error_message = ?, error_type = ?,
                    transcribe_started_at = datetime('now'),
                    progress_message = 'starting',
                    updated_at = datetime('now')
                WHERE content_hash = ?
                "#,
            )
            .bind(status)
            .bind(error_message)
            .bind(error_type)
            .bind(content_hash)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE recording_files
                SET status = ?, error_message = ?, error_type = ?,
                    progress_message = NULL, transcribe_started_at = NULL,
                    updated_at = datetime('now')
                WHERE content_hash = ?
                "#,
            )
            .bind(status)
            .bind(error_message)
            .bind(error_type)
            .bind(content_hash)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Live progress for the UI; only sticks while the row is in the
    /// transcribing state.
    pub async fn update_progress(&self, content_hash: &str, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE recording_files
            SET progress_message = ?, updated_at = datetime('now')
            WHERE content_hash = ? AND status = 'transcribing'
            "#,
        )
        .bind(message)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store transcription output and flip to 'transcribed'
    pub async fn update_transcription(
        &self,
        content_hash: &str,
        transcript: &str,
        language: Option<&str>,
        duration_secs: Option<f64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE recording_files
            SET status = 'transcribed', transcript = ?, language = ?,
                duration_secs = ?, error_message = NULL, error_type = NULL,
                progress_message = NULL, transcribe_started_at = NULL,
                updated_at = datetime('now')
            WHERE content_hash = ?
            "#,
        )
        .bind(transcript)
        .bind(language)
        .bind(duration_secs)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        info!("Transcription stored for {}", content_hash);
        Ok(())
    }

    pub async fn set_participants(&self, content_hash: &str, participants: &[String]) -> Result<()> {
        sqlx::query(
            "UPDATE recording_files SET participants = ?, updated_at = datetime('now') WHERE content_hash = ?",
        )
        .bind(serde_json::to_string(participants)?)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a file as indexed in the vector store
    pub async fn mark_approved(&self, content_hash: &str, source_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recording_files
            SET status = 'approved', source_id = ?, updated_at = datetime('now')
            WHERE content_hash = ?
            "#,
        )
        .bind(source_id)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_file(&self, content_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recording_files WHERE content_hash = ?")
            .bind(content_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_counts(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) as cnt FROM recording_files GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("status"), r.get("cnt")))
            .collect())
    }

    pub async fn known_hashes(&self) -> Result<HashSet<String>> {
        let hashes =
            sqlx::query_scalar::<_, String>("SELECT content_hash FROM recording_files")
                .fetch_all(&self.pool)
                .await?;
        Ok(hashes.into_iter().collect())
    }

    /// Reset rows stuck in 'transcribing' with no progress for longer
    /// than `stale_minutes` back to 'pending'. Returns the reset count.
    pub async fn reset_stale_transcribing(&self, stale_minutes: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE recording_files
            SET status = 'pending', progress_message = NULL,
                transcribe_started_at = NULL, updated_at = datetime('now')
            WHERE status = 'transcribing'
              AND transcribe_started_at IS NOT NULL
              AND transcribe_started_at < datetime('now', ?)
            "#,
        )
        .bind(format!("-{} minutes", stale_minutes))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("Reset {} stale transcribing jobs", result.rows_affected());
        }
        Ok(result.rows_affected())
    }
}
