// src/rag/engine.rs
// RagEngine: the retrieval engine facade

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use qdrant_client::qdrant::Filter;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, RetrievalConfig};
use crate::llm::{OpenAIChatProvider, OpenAIEmbeddings};
use crate::vector::{match_keyword, match_text, point_id_string, timestamp_gt, timestamp_range, VectorStore};

use super::buffer::ConversationBuffer;
use super::document::DocumentSource;
use super::search::{
    append_deduped, merge_field_results, node_from_payload, placeholder_node,
    reciprocal_rank_fusion, ScoredNode, SearchFilters,
};
use super::tokenize::tokenize_query;

/// Cached chat-name and sender label sets. Cold until first use, rebuilt
/// by a full collection scan on miss, updated incrementally on ingest,
/// invalidated on collection reset.
struct LabelCache {
    chats: RwLock<Option<HashSet<String>>>,
    senders: RwLock<Option<HashSet<String>>>,
}

/// Hybrid retrieval engine over the vector store.
///
/// The embedding client is eager (ingestion needs it immediately); the
/// LLM handle initializes lazily on the first chat request.
pub struct RagEngine {
    pub(super) store: Arc<VectorStore>,
    pub(super) embeddings: Arc<OpenAIEmbeddings>,
    pub(super) buffer: ConversationBuffer,
    pub(super) retrieval: RetrievalConfig,
    pub(super) timezone: Tz,
    llm_config: LlmConfig,
    llm: OnceCell<Arc<OpenAIChatProvider>>,
    labels: LabelCache,
}

impl RagEngine {
    pub fn new(
        store: Arc<VectorStore>,
        embeddings: Arc<OpenAIEmbeddings>,
        llm_config: LlmConfig,
        retrieval: RetrievalConfig,
        timezone: &str,
    ) -> Self {
        let tz: Tz = timezone.parse().unwrap_or(chrono_tz::Asia::Jerusalem);
        Self {
            store,
            embeddings,
            buffer: ConversationBuffer::new(tz),
            retrieval,
            timezone: tz,
            llm_config,
            llm: OnceCell::new(),
            labels: LabelCache {
                chats: RwLock::new(None),
                senders: RwLock::new(None),
            },
        }
    }

    pub fn timezone(&self) -> &Tz {
        &self.timezone
    }

    pub fn vector_store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Lazily initialized LLM handle (single-flight via OnceCell)
    pub async fn llm(&self) -> Arc<OpenAIChatProvider> {
        self.llm
            .get_or_init(|| async {
                info!("Configuring LLM provider (lazy init): {}", self.llm_config.model);
                Arc::new(OpenAIChatProvider::new(
                    self.llm_config.api_key.clone(),
                    self.llm_config.model.clone(),
                    self.llm_config.temperature,
                ))
            })
            .await
            .clone()
    }

    // ========================================================================
    // RETRIEVAL
    // ========================================================================

    /// Full retrieval pipeline: hybrid search, context expansion, recency
    /// supplement, and the ≥1-node guarantee.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredNode>> {
        let mut results = self.search(query, k, filters, false).await?;

        // Recency supplement: the newest messages are always visible so
        // temporally-worded queries reach the latest content. Appended
        // after the fused semantic results, keeping its position.
        let recent = self
            .recency_search(self.retrieval.recency_supplement_count, filters)
            .await;
        if !recent.is_empty() {
            if results.is_empty() {
                info!("Semantic search empty, using {} recent messages", recent.len());
                results = recent;
            } else {
                append_deduped(&mut results, recent);
            }
        }

        // Context expansion last: surrounding messages from the matched
        // chats land after both semantic and recency results.
        if !results.is_empty() {
            self.expand_context(&mut results, k * 2).await;
        }

        if results.is_empty() {
            results.push(placeholder_node());
        }

        Ok(results)
    }

    /// Hybrid semantic + lexical search.
    ///
    /// The vector leg fetches 2·k candidates and applies the minimum
    /// similarity threshold. The lexical leg (skipped when a sender
    /// filter is set) runs an OR-of-tokens search per indexed field and
    /// both legs merge via RRF.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
        metadata_only: bool,
    ) -> Result<Vec<ScoredNode>> {
        if metadata_only {
            return self.metadata_search(k, filters).await;
        }

        let now = Utc::now().timestamp();
        let conditions = filters.to_conditions(now);
        let filter = if conditions.is_empty() {
            None
        } else {
            Some(Filter::must(conditions.clone()))
        };

        // Vector leg. Fetch 2·k to compensate for threshold culling,
        // especially for morphologically rich languages.
        let query_vector = self.embeddings.embed_query(query).await?;
        let hits = self
            .store
            .search(query_vector, filter, (k * 2) as u64)
            .await?;

        let mut vector_results: Vec<ScoredNode> = hits
            .into_iter()
            .filter_map(|p| {
                let id = point_id_string(&p.id)?;
                node_from_payload(id, p.score, &p.payload, &self.timezone)
            })
            .collect();

        let before = vector_results.len();
        vector_results.retain(|n| n.score >= self.retrieval.min_score);
        if before > vector_results.len() {
            debug!(
                "Score threshold filtered {} results below {}",
                before - vector_results.len(),
                self.retrieval.min_score
            );
        }

        // Lexical leg. An exact sender filter already pins the results,
        // so the per-field text search is skipped in that case.
        if filters.sender.is_none() {
            let fulltext = self.fulltext_search(query, k, &conditions).await;
            if !fulltext.is_empty() {
                let fused = reciprocal_rank_fusion(
                    vector_results,
                    fulltext,
                    k,
                    self.retrieval.rrf_k,
                );
                info!("RRF fused hybrid results → {} final", fused.len());
                return Ok(fused);
            }
        }

        vector_results.truncate(k);
        Ok(vector_results)
    }

    /// Metadata-only search: scroll with filters, no embedding call,
    /// score 1.0 for every hit.
    pub async fn metadata_search(&self, k: usize, filters: &SearchFilters) -> Result<Vec<ScoredNode>> {
        let now = Utc::now().timestamp();
        let conditions = filters.to_conditions(now);
        if conditions.is_empty() {
            debug!("Metadata search called with no filters, skipping");
            return Ok(Vec::new());
        }

        let points = self
            .store
            .scroll(Some(Filter::must(conditions)), k as u32, false)
            .await?;

        let nodes = points
            .into_iter()
            .filter_map(|p| {
                let id = point_id_string(&p.id)?;
                node_from_payload(id, 1.0, &p.payload, &self.timezone)
            })
            .collect::<Vec<_>>();
        info!("Metadata search returned {} results", nodes.len());
        Ok(nodes)
    }

    /// Per-field OR-of-tokens full-text search merged by max field score
    async fn fulltext_search(
        &self,
        query: &str,
        k: usize,
        must_conditions: &[qdrant_client::qdrant::Condition],
    ) -> Vec<ScoredNode> {
        let tokens = tokenize_query(query);
        if tokens.is_empty() {
            debug!("No tokens extracted from query, skipping fulltext search");
            return Vec::new();
        }
        debug!("Fulltext tokens: {:?}", tokens);

        let field_scores = [
            ("sender", self.retrieval.fulltext_score_sender),
            ("chat_name", self.retrieval.fulltext_score_chat_name),
            ("message", self.retrieval.fulltext_score_message),
        ];

        let mut field_results = Vec::with_capacity(field_scores.len());
        for (field, score) in field_scores {
            let should: Vec<_> = tokens.iter().map(|t| match_text(field, t)).collect();
            let filter = Filter {
                must: must_conditions.to_vec(),
                should,
                ..Default::default()
            };

            match self.store.scroll(Some(filter), k as u32, false).await {
                Ok(points) => {
                    let nodes: Vec<ScoredNode> = points
                        .into_iter()
                        .filter_map(|p| {
                            let id = point_id_string(&p.id)?;
                            node_from_payload(id, score, &p.payload, &self.timezone)
                        })
                        .collect();
                    field_results.push(nodes);
                }
                Err(e) => {
                    debug!("Full-text search on '{}' failed: {}", field, e);
                }
            }
        }

        merge_field_results(field_results, k)
    }

    /// Newest messages by timestamp, excluding the timestamp-0
    /// conversation chunks. Scores carry the timestamp so newest ranks
    /// highest among the supplements.
    pub async fn recency_search(&self, k: usize, filters: &SearchFilters) -> Vec<ScoredNode> {
        let now = Utc::now().timestamp();
        let mut conditions = filters.to_conditions(now);
        conditions.push(timestamp_gt(0));

        match self
            .store
            .scroll(Some(Filter::must(conditions)), k as u32, true)
            .await
        {
            Ok(points) => points
                .into_iter()
                .filter_map(|p| {
                    let id = point_id_string(&p.id)?;
                    let node = node_from_payload(id, 0.0, &p.payload, &self.timezone)?;
                    let ts = node.timestamp as f32;
                    Some(ScoredNode { score: ts, ..node })
                })
                .collect(),
            Err(e) => {
                warn!("Recency search failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Fetch messages within ±context_window_seconds of the matched
    /// timestamps, per chat, bounded to `max_total` overall. Context
    /// nodes carry a deliberately low score (0.5) and are appended after
    /// the fused results, never entering RRF.
    pub async fn expand_context(&self, results: &mut Vec<ScoredNode>, max_total: usize) {
        if results.is_empty() || results.len() >= max_total {
            return;
        }

        let mut chat_windows: HashMap<String, Vec<i64>> = HashMap::new();
        let mut existing: HashSet<String> = HashSet::new();
        for node in results.iter() {
            existing.insert(node.id.clone());
            if !node.chat_name.is_empty() && node.timestamp > 0 {
                chat_windows
                    .entry(node.chat_name.clone())
                    .or_default()
                    .push(node.timestamp);
            }
        }
        if chat_windows.is_empty() {
            return;
        }

        let budget = max_total - results.len();
        let per_chat_limit = std::cmp::max(3, budget / chat_windows.len());
        let window = self.retrieval.context_window_seconds;

        let mut expanded: Vec<ScoredNode> = Vec::new();
        for (chat_name, timestamps) in chat_windows {
            let min_ts = timestamps.iter().min().copied().unwrap_or(0) - window;
            let max_ts = timestamps.iter().max().copied().unwrap_or(0) + window;

            let filter = Filter::must([
                match_keyword("chat_name", &chat_name),
                timestamp_range(Some(min_ts), Some(max_ts)),
            ]);

            match self
                .store
                .scroll(Some(filter), per_chat_limit as u32, true)
                .await
            {
                Ok(points) => {
                    for p in points {
                        let Some(id) = point_id_string(&p.id) else { continue };
                        if !existing.insert(id.clone()) {
                            continue;
                        }
                        if let Some(node) =
                            node_from_payload(id, 0.5, &p.payload, &self.timezone)
                        {
                            expanded.push(node);
                        }
                    }
                }
                Err(e) => {
                    debug!("Context expansion for chat '{}' failed: {}", chat_name, e);
                }
            }
        }

        if !expanded.is_empty() {
            info!("Context expansion added {} surrounding messages", expanded.len());
            results.extend(expanded);
            results.truncate(max_total);
        }
    }

    // ========================================================================
    // LABEL CACHES
    // ========================================================================

    /// All unique chat names, rebuilding the cache by a full scan on miss
    pub async fn get_chat_list(&self) -> Vec<String> {
        self.get_label_list(&self.labels.chats, "chat_name").await
    }

    /// All unique sender names, rebuilding the cache by a full scan on miss
    pub async fn get_sender_list(&self) -> Vec<String> {
        self.get_label_list(&self.labels.senders, "sender").await
    }

    async fn get_label_list(
        &self,
        cache: &RwLock<Option<HashSet<String>>>,
        field: &str,
    ) -> Vec<String> {
        {
            let guard = cache.read().await;
            if let Some(values) = guard.as_ref() {
                let mut sorted: Vec<String> = values.iter().cloned().collect();
                sorted.sort();
                return sorted;
            }
        }

        // Cache miss: rebuild from a full collection scan
        let mut values: HashSet<String> = HashSet::new();
        let scan = self
            .store
            .scan_payloads(|payload| {
                if let Some(v) = payload.get(field).and_then(|v| v.as_str()) {
                    if !v.is_empty() {
                        values.insert(v.to_string());
                    }
                }
            })
            .await;
        if let Err(e) = scan {
            warn!("Failed to rebuild cached {} list: {}", field, e);
            return Vec::new();
        }

        info!("Rebuilt cached {} list: {} unique values", field, values.len());
        let mut sorted: Vec<String> = values.iter().cloned().collect();
        sorted.sort();
        *cache.write().await = Some(values);
        sorted
    }

    /// Incrementally add labels on ingest (no-op while the cache is cold)
    pub(super) async fn update_label_caches(&self, chat_name: &str, sender: &str) {
        if !chat_name.is_empty() {
            if let Some(chats) = self.labels.chats.write().await.as_mut() {
                chats.insert(chat_name.to_string());
            }
        }
        if !sender.is_empty() {
            if let Some(senders) = self.labels.senders.write().await.as_mut() {
                senders.insert(sender.to_string());
            }
        }
    }

    /// Drop the cached label sets, forcing a rebuild on next access
    pub async fn invalidate_label_caches(&self) {
        *self.labels.chats.write().await = None;
        *self.labels.senders.write().await = None;
        info!("Invalidated cached chat/sender lists");
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Collection stats with per-source breakdowns
    pub async fn stats(&self) -> serde_json::Value {
        let total = self.store.total_count().await.unwrap_or(0);
        let sources: Vec<&str> = DocumentSource::all().iter().map(|s| s.as_str()).collect();
        let source_counts = self.store.source_counts(&sources).await;

        json!({
            "total_documents": total,
            "source_counts": source_counts,
            "collection_name": self.store.collection_name(),
        })
    }

    /// Delete all points from one source. Invalidates the label caches.
    pub async fn delete_by_source(&self, source: DocumentSource) -> Result<u64> {
        let filter = Filter::must([match_keyword("source", source.as_str())]);
        let deleted = self.store.delete_by_filter(filter).await?;
        self.invalidate_label_caches().await;
        info!("Deleted {} points with source='{}'", deleted, source);
        Ok(deleted)
    }

    /// Drop and recreate the collection. Invalidates the label caches.
    pub async fn reset_collection(&self) -> Result<()> {
        self.store.reset().await?;
        self.invalidate_label_caches().await;
        Ok(())
    }
}
