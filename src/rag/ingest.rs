// src/rag/ingest.rs
// Ingestion: dedup → chunk → embed → upsert

use anyhow::{anyhow, Result};
use qdrant_client::qdrant::PointStruct;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::llm::EmbeddingError;

use super::chunker::{is_quality_chunk, split_text, CHUNK_OVERLAP_CHARS, EMBEDDING_MAX_CHARS, MAX_CHUNK_CHARS};
use super::document::RagDocument;
use super::engine::RagEngine;

/// Outcome of ingesting one document
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestOutcome {
    pub added: usize,
    pub skipped: bool,
}

impl RagEngine {
    /// Ingest a document: skip when its `source_id` already exists, else
    /// chunk, embed (one batch call per document) and upsert.
    ///
    /// Re-ingesting the same document is a no-op thanks to the dedup
    /// predicate, and produces identical deterministic point ids when
    /// forced through.
    pub async fn add_document(&self, doc: &RagDocument) -> Result<IngestOutcome> {
        if self.store.point_exists(&doc.source_id).await {
            debug!("Skipping duplicate document: {}", doc.source_id);
            return Ok(IngestOutcome { added: 0, skipped: true });
        }
        self.add_document_unchecked(doc).await
    }

    /// Ingest without the dedup check (force mode re-syncs use this)
    pub async fn add_document_unchecked(&self, doc: &RagDocument) -> Result<IngestOutcome> {
        let chunks: Vec<String> = if doc.text.chars().count() > MAX_CHUNK_CHARS {
            split_text(&doc.text, MAX_CHUNK_CHARS, CHUNK_OVERLAP_CHARS)
                .into_iter()
                .filter(|c| is_quality_chunk(c))
                .collect()
        } else {
            vec![doc.text.clone()]
        };

        if chunks.is_empty() {
            debug!("No quality chunks for {}", doc.source_id);
            return Ok(IngestOutcome { added: 0, skipped: true });
        }

        let embedding_texts: Vec<String> =
            chunks.iter().map(|c| doc.embedding_text(c)).collect();
        let vectors = self.embed_with_safeguard(embedding_texts).await?;
        if vectors.len() != chunks.len() {
            return Err(anyhow!(
                "Embedding count mismatch: {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            ));
        }

        let total = chunks.len();
        let points: Vec<PointStruct> = chunks
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (chunk, vector))| doc.to_point(chunk, i, total, vector))
            .collect();

        self.store.upsert(points).await?;
        self.update_label_caches(&doc.chat_name, &doc.sender).await;

        debug!(
            "Added {}/{} document to archive: {} chunk(s)",
            doc.source, doc.source_id, total
        );
        Ok(IngestOutcome { added: total, skipped: false })
    }

    /// Ingest a batch of documents, skipping duplicates. Returns the
    /// number of documents added.
    pub async fn add_documents(&self, docs: &[RagDocument]) -> usize {
        let mut added = 0usize;
        for doc in docs {
            match self.add_document(doc).await {
                Ok(outcome) if !outcome.skipped => added += 1,
                Ok(_) => {}
                Err(e) => warn!("Failed to add document {}: {}", doc.source_id, e),
            }
        }
        if added > 0 {
            info!("Added {} documents to the archive", added);
        }
        added
    }

    /// Embedding safeguard: try the full texts, and on a context-length
    /// error truncate every oversized text once and retry. The stored
    /// payload keeps the full content either way.
    async fn embed_with_safeguard(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        match self.embeddings.embed_documents(&texts).await {
            Ok(vectors) => Ok(vectors),
            Err(EmbeddingError::ContextLength) => {
                warn!(
                    "Embedding input too long, truncating to {} chars and retrying",
                    EMBEDDING_MAX_CHARS
                );
                let truncated: Vec<String> = texts
                    .into_iter()
                    .map(|t| {
                        if t.chars().count() > EMBEDDING_MAX_CHARS {
                            t.chars().take(EMBEDDING_MAX_CHARS).collect()
                        } else {
                            t
                        }
                    })
                    .collect();
                Ok(self.embeddings.embed_documents(&truncated).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Buffer a message for conversation chunking; flushes the chat's
    /// buffer as a timestamp-0 chunk document when it fills up.
    pub async fn buffer_message(
        &self,
        chat_id: &str,
        chat_name: &str,
        is_group: bool,
        sender: &str,
        message: &str,
        timestamp: i64,
    ) {
        if let Some(chunk) = self
            .buffer
            .push(chat_id, chat_name, is_group, sender, message, timestamp)
            .await
        {
            let chat = chunk.chat_name.clone();
            match self.add_document(&chunk).await {
                Ok(_) => info!("Created conversation chunk for {}", chat),
                Err(e) => warn!("Failed to flush chunk buffer for {}: {}", chat, e),
            }
        }
    }

    /// Flush conversation buffers whose TTL expired. Driven by a
    /// background tick.
    pub async fn flush_stale_buffers(&self) {
        for chunk in self.buffer.flush_expired().await {
            let chat = chunk.chat_name.clone();
            match self.add_document(&chunk).await {
                Ok(_) => info!("Created conversation chunk for {} (TTL flush)", chat),
                Err(e) => warn!("Failed to flush chunk buffer for {}: {}", chat, e),
            }
        }
    }
}
