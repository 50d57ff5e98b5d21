// src/entity/graph.rs
// Read-only graph projections for visualization

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;
use std::collections::HashSet;
use tracing::info;

use super::store::EntityStore;

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_assets: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub edge_category: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Short display label for an asset: the tail of the ref split on ':'
fn asset_label(asset_ref: &str) -> String {
    let tail = asset_ref.rsplit(':').next().unwrap_or(asset_ref);
    tail.chars().take(30).collect()
}

impl EntityStore {
    /// Person-only graph: relationship edges plus per-person asset-count
    /// annotations. Persons with relationships, assets or facts first.
    pub async fn get_graph_data(&self, limit: i64) -> Result<GraphData> {
        let persons = sqlx::query(
            r#"
            SELECT p.id, p.canonical_name, p.phone,
                   COALESCE(asset_cnt.cnt, 0) AS assets,
                   COALESCE(fact_cnt.cnt, 0) AS facts,
                   COALESCE(rel_cnt.cnt, 0) AS rels,
                   (SELECT COUNT(*) FROM person_aliases a WHERE a.person_id = p.id) AS aliases
            FROM persons p
            LEFT JOIN (SELECT person_id, COUNT(*) as cnt FROM person_assets GROUP BY person_id) asset_cnt
                ON asset_cnt.person_id = p.id
            LEFT JOIN (SELECT person_id, COUNT(*) as cnt FROM person_facts GROUP BY person_id) fact_cnt
                ON fact_cnt.person_id = p.id
            LEFT JOIN (SELECT person_id, COUNT(*) as cnt FROM person_relationships GROUP BY person_id) rel_cnt
                ON rel_cnt.person_id = p.id
            WHERE p.is_group = FALSE
            ORDER BY (rels > 0) DESC, (assets > 0) DESC, (facts > 0) DESC, p.canonical_name
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        let mut nodes = Vec::with_capacity(persons.len());
        let mut ids: Vec<i64> = Vec::with_capacity(persons.len());

        for row in &persons {
            let id: i64 = row.get("id");
            ids.push(id);
            nodes.push(GraphNode {
                id: id.to_string(),
                node_type: "person".to_string(),
                label: row.get("canonical_name"),
                phone: row.get("phone"),
                asset_type: None,
                alias_count: Some(row.get("aliases")),
                fact_count: Some(row.get("facts")),
                total_assets: Some(row.get("assets")),
            });
        }

        let mut edges = Vec::new();
        if !ids.is_empty() {
            let placeholders = vec!["?"; ids.len()].join(",");
            let query = format!(
                r#"
                SELECT r.person_id, r.related_person_id, r.relationship_type, r.confidence
                FROM person_relationships r
                WHERE r.person_id IN ({p}) AND r.related_person_id IN ({p})
                "#,
                p = placeholders
            );
            let mut q = sqlx::query(&query);
            for _ in 0..2 {
                for id in &ids {
                    q = q.bind(id);
                }
            }
            let rel_rows = q.fetch_all(self.pool()).await?;
            for row in rel_rows {
                edges.push(GraphEdge {
                    source: row.get::<i64, _>("person_id").to_string(),
                    target: row.get::<i64, _>("related_person_id").to_string(),
                    edge_type: row.get("relationship_type"),
                    edge_category: "identity_identity".to_string(),
                    confidence: row.get("confidence"),
                });
            }
        }

        Ok(GraphData { nodes, edges })
    }

    /// Full graph with person nodes, asset nodes, and all three edge
    /// categories (identity↔identity, identity↔asset, asset↔asset).
    pub async fn get_full_graph_data(
        &self,
        limit_persons: i64,
        limit_assets_per_person: i64,
    ) -> Result<GraphData> {
        let mut nodes: Vec<GraphNode> = Vec::new();
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut asset_refs: HashSet<String> = HashSet::new();

        let persons = sqlx::query(
            r#"
            SELECT p.id, p.canonical_name, p.phone,
                   (SELECT COUNT(*) FROM person_aliases a WHERE a.person_id = p.id) AS aliases,
                   (SELECT COUNT(*) FROM person_facts f WHERE f.person_id = p.id) AS facts,
                   (SELECT COUNT(*) FROM person_assets pa WHERE pa.person_id = p.id) AS assets
            FROM persons p
            WHERE p.is_group = FALSE
            ORDER BY p.canonical_name
            LIMIT ?
            "#,
        )
        .bind(limit_persons)
        .fetch_all(self.pool())
        .await?;

        let mut person_ids: Vec<i64> = Vec::with_capacity(persons.len());
        for row in &persons {
            let id: i64 = row.get("id");
            person_ids.push(id);
            nodes.push(GraphNode {
                id: format!("person:{}", id),
                node_type: "person".to_string(),
                label: row.get("canonical_name"),
                phone: row.get("phone"),
                asset_type: None,
                alias_count: Some(row.get("aliases")),
                fact_count: Some(row.get("facts")),
                total_assets: Some(row.get("assets")),
            });
        }

        // Identity↔identity edges
        if !person_ids.is_empty() {
            let placeholders = vec!["?"; person_ids.len()].join(",");
            let query = format!(
                "SELECT person_id, related_person_id, relationship_type, confidence \
                 FROM person_relationships \
                 WHERE person_id IN ({p}) AND related_person_id IN ({p})",
                p = placeholders
            );
            let mut q = sqlx::query(&query);
            for _ in 0..2 {
                for id in &person_ids {
                    q = q.bind(id);
                }
            }
            for row in q.fetch_all(self.pool()).await? {
                edges.push(GraphEdge {
                    source: format!("person:{}", row.get::<i64, _>("person_id")),
                    target: format!("person:{}", row.get::<i64, _>("related_person_id")),
                    edge_type: row.get("relationship_type"),
                    edge_category: "identity_identity".to_string(),
                    confidence: row.get("confidence"),
                });
            }
        }

        // Asset nodes + identity↔asset edges
        for &pid in &person_ids {
            let links = sqlx::query(
                r#"
                SELECT asset_type, asset_ref, role, confidence
                FROM person_assets WHERE person_id = ?
                ORDER BY created_at DESC LIMIT ?
                "#,
            )
            .bind(pid)
            .bind(limit_assets_per_person)
            .fetch_all(self.pool())
            .await?;

            for link in links {
                let aref: String = link.get("asset_ref");
                let atype: String = link.get("asset_type");

                if asset_refs.insert(aref.clone()) {
                    nodes.push(GraphNode {
                        id: format!("asset:{}", aref),
                        node_type: "asset".to_string(),
                        label: asset_label(&aref),
                        phone: None,
                        asset_type: Some(atype),
                        alias_count: None,
                        fact_count: None,
                        total_assets: None,
                    });
                }

                edges.push(GraphEdge {
                    source: format!("person:{}", pid),
                    target: format!("asset:{}", aref),
                    edge_type: link.get("role"),
                    edge_category: "identity_asset".to_string(),
                    confidence: link.get("confidence"),
                });
            }
        }

        // Asset↔asset edges touching the graph's assets
        if !asset_refs.is_empty() {
            let refs: Vec<String> = asset_refs.iter().cloned().collect();
            let placeholders = vec!["?"; refs.len()].join(",");
            let query = format!(
                "SELECT src_asset_ref, dst_asset_ref, relation_type, confidence \
                 FROM asset_asset_edges \
                 WHERE src_asset_ref IN ({p}) OR dst_asset_ref IN ({p}) LIMIT 500",
                p = placeholders
            );
            let mut q = sqlx::query(&query);
            for _ in 0..2 {
                for r in &refs {
                    q = q.bind(r);
                }
            }
            for row in q.fetch_all(self.pool()).await? {
                let src: String = row.get("src_asset_ref");
                let dst: String = row.get("dst_asset_ref");

                // Assets discovered only through edges still get nodes,
                // except synthetic thread anchors
                for aref in [&src, &dst] {
                    if !aref.starts_with("thread:") && asset_refs.insert(aref.clone()) {
                        nodes.push(GraphNode {
                            id: format!("asset:{}", aref),
                            node_type: "asset".to_string(),
                            label: asset_label(aref),
                            phone: None,
                            asset_type: Some("linked".to_string()),
                            alias_count: None,
                            fact_count: None,
                            total_assets: None,
                        });
                    }
                }

                edges.push(GraphEdge {
                    source: format!("asset:{}", src),
                    target: format!("asset:{}", dst),
                    edge_type: row.get("relation_type"),
                    edge_category: "asset_asset".to_string(),
                    confidence: row.get("confidence"),
                });
            }
        }

        info!(
            "Full graph: {} nodes ({} persons, {} assets), {} edges",
            nodes.len(),
            person_ids.len(),
            asset_refs.len(),
            edges.len()
        );

        Ok(GraphData { nodes, edges })
    }
}
