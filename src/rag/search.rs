// src/rag/search.rs
// Hybrid retrieval: filter surface, rank fusion, and result shaping

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use qdrant_client::qdrant::{Condition, Value as QdrantValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::vector::{match_keyword, timestamp_range};

use super::document::DocumentSource;

/// Filter surface for retrieval requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub chat_name: Option<String>,
    pub sender: Option<String>,
    /// timestamp >= now - days * 86400
    pub days: Option<i64>,
    /// OR over source
    pub sources: Option<Vec<DocumentSource>>,
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
    /// OR over content_type
    pub content_types: Option<Vec<String>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.chat_name.is_none()
            && self.sender.is_none()
            && self.days.is_none()
            && self.sources.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.content_types.is_none()
    }

    /// Build the `must` conditions shared by every search leg
    pub fn to_conditions(&self, now: i64) -> Vec<Condition> {
        let mut conditions = Vec::new();

        if let Some(chat) = &self.chat_name {
            conditions.push(match_keyword("chat_name", chat));
        }
        if let Some(sender) = &self.sender {
            conditions.push(match_keyword("sender", sender));
        }
        if let Some(days) = self.days {
            if days > 0 {
                conditions.push(timestamp_range(Some(now - days * 86_400), None));
            }
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            conditions.push(timestamp_range(self.date_from, self.date_to));
        }
        if let Some(sources) = &self.sources {
            if !sources.is_empty() {
                let should: Vec<Condition> = sources
                    .iter()
                    .map(|s| match_keyword("source", s.as_str()))
                    .collect();
                conditions.push(Condition::from(qdrant_client::qdrant::Filter::should(
                    should,
                )));
            }
        }
        if let Some(types) = &self.content_types {
            if !types.is_empty() {
                let should: Vec<Condition> = types
                    .iter()
                    .map(|t| match_keyword("content_type", t))
                    .collect();
                conditions.push(Condition::from(qdrant_client::qdrant::Filter::should(
                    should,
                )));
            }
        }

        conditions
    }
}

/// A retrieved node with its score and the payload fields the answerer
/// and citation renderer need
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredNode {
    pub id: String,
    pub score: f32,
    /// Display text fed to the answer prompt
    pub text: String,
    pub source: String,
    pub source_id: String,
    pub chat_name: String,
    pub sender: String,
    pub timestamp: i64,
    pub content_type: String,
}

/// Format a unix timestamp for display in the configured timezone
pub fn format_timestamp(timestamp: i64, tz: &Tz) -> String {
    match Utc.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => {
            dt.with_timezone(tz).format("%d/%m/%Y %H:%M").to_string()
        }
        _ => timestamp.to_string(),
    }
}

fn payload_str(payload: &HashMap<String, QdrantValue>, key: &str) -> String {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

/// Convert a point payload into a scored node. Returns None when the
/// payload has no usable text.
pub fn node_from_payload(
    id: String,
    score: f32,
    payload: &HashMap<String, QdrantValue>,
    tz: &Tz,
) -> Option<ScoredNode> {
    let message = payload_str(payload, "message");
    if message.is_empty() {
        return None;
    }

    let chat_name = payload_str(payload, "chat_name");
    let sender = payload_str(payload, "sender");
    let timestamp = payload
        .get("timestamp")
        .and_then(|v| v.as_integer())
        .unwrap_or(0);

    let formatted_time = format_timestamp(timestamp, tz);
    let text = if sender.is_empty() {
        format!("[{}] {}: {}", formatted_time, chat_name, message)
    } else {
        format!("[{}] {} in {}: {}", formatted_time, sender, chat_name, message)
    };

    Some(ScoredNode {
        id,
        score,
        text,
        source: payload_str(payload, "source"),
        source_id: payload_str(payload, "source_id"),
        chat_name,
        sender,
        timestamp,
        content_type: payload_str(payload, "content_type"),
    })
}

/// Synthetic node returned when the archive has nothing for a query, so
/// downstream answer synthesis always has input to work with.
pub fn placeholder_node() -> ScoredNode {
    ScoredNode {
        id: "placeholder".to_string(),
        score: 0.0,
        text: "[No relevant messages found in the archive for this query]".to_string(),
        source: "system".to_string(),
        source_id: String::new(),
        chat_name: String::new(),
        sender: String::new(),
        timestamp: 0,
        content_type: String::new(),
    }
}

/// Merge per-field full-text results by node id, keeping the max
/// per-field score, sorted descending, truncated to k.
pub fn merge_field_results(field_results: Vec<Vec<ScoredNode>>, k: usize) -> Vec<ScoredNode> {
    let mut best: HashMap<String, ScoredNode> = HashMap::new();

    for nodes in field_results {
        for node in nodes {
            match best.get(&node.id) {
                Some(existing) if existing.score >= node.score => {}
                _ => {
                    best.insert(node.id.clone(), node);
                }
            }
        }
    }

    let mut merged: Vec<ScoredNode> = best.into_values().collect();
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(k);
    merged
}

/// Merge vector and full-text results with Reciprocal Rank Fusion.
///
/// score(n) = Σ 1 / (rrf_k + rank_in_list(n)), summed over the lists the
/// node appears in. Avoids normalizing incompatible score scales
/// (cosine similarity vs field scores). Returns top-k by fused score.
pub fn reciprocal_rank_fusion(
    vector_results: Vec<ScoredNode>,
    fulltext_results: Vec<ScoredNode>,
    k: usize,
    rrf_k: usize,
) -> Vec<ScoredNode> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut node_map: HashMap<String, ScoredNode> = HashMap::new();

    for (rank, node) in vector_results.into_iter().enumerate() {
        *scores.entry(node.id.clone()).or_insert(0.0) += 1.0 / (rrf_k + rank + 1) as f32;
        node_map.entry(node.id.clone()).or_insert(node);
    }
    for (rank, node) in fulltext_results.into_iter().enumerate() {
        *scores.entry(node.id.clone()).or_insert(0.0) += 1.0 / (rrf_k + rank + 1) as f32;
        node_map.entry(node.id.clone()).or_insert(node);
    }

    let mut ids: Vec<(String, f32)> = scores.into_iter().collect();
    ids.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ids.truncate(k);

    ids.into_iter()
        .filter_map(|(id, score)| {
            node_map.remove(&id).map(|mut node| {
                node.score = score;
                node
            })
        })
        .collect()
}

/// Append supplemental nodes (recency, context expansion) after the
/// primary results, de-duplicated by node id.
pub fn append_deduped(primary: &mut Vec<ScoredNode>, supplemental: Vec<ScoredNode>) {
    let existing: std::collections::HashSet<String> =
        primary.iter().map(|n| n.id.clone()).collect();
    for node in supplemental {
        if !existing.contains(&node.id) {
            primary.push(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, score: f32) -> ScoredNode {
        ScoredNode {
            id: id.to_string(),
            score,
            text: format!("text {}", id),
            source: "whatsapp".to_string(),
            source_id: id.to_string(),
            chat_name: "Family".to_string(),
            sender: "Alice".to_string(),
            timestamp: 100,
            content_type: "message".to_string(),
        }
    }

    #[test]
    fn rrf_ranks_nodes_in_both_lists_first() {
        let vector = vec![node("a", 0.9), node("b", 0.8)];
        let fulltext = vec![node("b", 0.95), node("c", 0.75)];
        let fused = reciprocal_rank_fusion(vector, fulltext, 10, 60);
        assert_eq!(fused[0].id, "b");
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn rrf_respects_k() {
        let vector = vec![node("a", 0.9), node("b", 0.8), node("c", 0.7)];
        let fused = reciprocal_rank_fusion(vector, vec![], 2, 60);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].id, "a");
    }

    #[test]
    fn field_merge_keeps_max_score() {
        let sender_hits = vec![node("a", 0.95)];
        let message_hits = vec![node("a", 0.75), node("b", 0.75)];
        let merged = merge_field_results(vec![sender_hits, message_hits], 10);
        assert_eq!(merged[0].id, "a");
        assert!((merged[0].score - 0.95).abs() < f32::EPSILON);
    }

    #[test]
    fn append_deduped_skips_existing_ids() {
        let mut primary = vec![node("a", 0.9)];
        append_deduped(&mut primary, vec![node("a", 0.5), node("b", 0.5)]);
        assert_eq!(primary.len(), 2);
        assert_eq!(primary[1].id, "b");
    }

    #[test]
    fn filters_build_conditions() {
        let filters = SearchFilters {
            chat_name: Some("Family".to_string()),
            days: Some(7),
            ..Default::default()
        };
        let conditions = filters.to_conditions(1_000_000);
        assert_eq!(conditions.len(), 2);
    }

    #[test]
    fn empty_filter_detection() {
        assert!(SearchFilters::default().is_empty());
        let f = SearchFilters {
            sender: Some("Bob".to_string()),
            ..Default::default()
        };
        assert!(!f.is_empty());
    }
}
