// src/config/mod.rs
// Central configuration for the recall backend

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    pub static ref CONFIG: RecallConfig = RecallConfig::from_env();
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8420u16),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// SQLite settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_or("DATABASE_URL", "sqlite://data/recall.db?mode=rwc"),
            max_connections: env_parse("SQLITE_MAX_CONNECTIONS", 5u32),
        }
    }
}

/// Qdrant vector store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub vector_size: u64,
    /// Read timeout in seconds for scroll/query calls
    pub timeout_secs: u64,
}

impl QdrantConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_or("QDRANT_URL", "http://localhost:6334"),
            collection: env_or("QDRANT_COLLECTION", "archive"),
            vector_size: env_parse("RAG_VECTOR_SIZE", 1024u64),
            timeout_secs: env_parse("QDRANT_TIMEOUT_SECS", 10u64),
        }
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: u64,
}

impl EmbeddingConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_or("OPENAI_API_KEY", ""),
            model: env_or("EMBEDDING_MODEL", "text-embedding-3-large"),
            dimensions: env_parse("RAG_VECTOR_SIZE", 1024u64),
        }
    }
}

/// LLM provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_or("OPENAI_API_KEY", ""),
            model: env_or("LLM_MODEL", "gpt-4o"),
            temperature: env_parse("LLM_TEMPERATURE", 0.3f32),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            anyhow::bail!("OPENAI_API_KEY is not set");
        }
        Ok(())
    }
}

/// Retrieval tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub min_score: f32,
    pub rrf_k: usize,
    pub recency_supplement_count: usize,
    pub context_window_seconds: i64,
    pub fulltext_score_sender: f32,
    pub fulltext_score_chat_name: f32,
    pub fulltext_score_message: f32,
}

impl RetrievalConfig {
    pub fn from_env() -> Self {
        Self {
            min_score: env_parse("RAG_MIN_SCORE", 0.3f32),
            rrf_k: env_parse("RAG_RRF_K", 60usize),
            recency_supplement_count: env_parse("RAG_RECENCY_COUNT", 5usize),
            context_window_seconds: env_parse("RAG_CONTEXT_WINDOW_SECONDS", 1800i64),
            fulltext_score_sender: env_parse("RAG_FULLTEXT_SCORE_SENDER", 0.95f32),
            fulltext_score_chat_name: env_parse("RAG_FULLTEXT_SCORE_CHAT_NAME", 0.85f32),
            fulltext_score_message: env_parse("RAG_FULLTEXT_SCORE_MESSAGE", 0.75f32),
        }
    }
}

/// Chat session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub ttl_minutes: i64,
    pub max_history_turns: usize,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self {
            ttl_minutes: env_parse("SESSION_TTL_MINUTES", 1440i64),
            max_history_turns: env_parse("SESSION_MAX_HISTORY", 20usize),
        }
    }
}

/// Per-client rate limit for LLM-invoking endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        Self {
            requests_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", 20u32),
        }
    }
}

/// Main configuration structure - composes all domain configs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub qdrant: QdrantConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub timezone: String,
}

impl RecallConfig {
    pub fn from_env() -> Self {
        // Don't panic if .env doesn't exist (for production)
        dotenv::dotenv().ok();

        Self {
            server: ServerConfig::from_env(),
            database: DatabaseConfig::from_env(),
            qdrant: QdrantConfig::from_env(),
            embedding: EmbeddingConfig::from_env(),
            llm: LlmConfig::from_env(),
            retrieval: RetrievalConfig::from_env(),
            session: SessionConfig::from_env(),
            rate_limit: RateLimitConfig::from_env(),
            timezone: env_or("TIMEZONE", "Asia/Jerusalem"),
        }
    }

    /// Validate config on startup
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.validate()?;
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        self.server.bind_address()
    }
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
