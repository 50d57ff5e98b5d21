// src/entity/assets.rs
// Person↔asset links and asset↔asset edges

use anyhow::Result;
use sqlx::Row;
use std::collections::HashMap;
use tracing::debug;

use super::store::EntityStore;
use super::types::{AssetEdge, PersonAsset};

/// Direction selector for edge queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Outgoing,
    Incoming,
    Both,
}

impl EntityStore {
    // ========================================================================
    // PERSON ↔ ASSET LINKS
    // ========================================================================

    /// Link a person to an asset with a role. Duplicate links are ignored.
    pub async fn link_person_asset(
        &self,
        person_id: i64,
        asset_type: &str,
        asset_ref: &str,
        role: &str,
        confidence: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO person_assets
                (person_id, asset_type, asset_ref, role, confidence)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(person_id)
        .bind(asset_type)
        .bind(asset_ref)
        .bind(role)
        .bind(confidence)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Link several persons to one asset in a single transaction
    pub async fn link_persons_to_asset(
        &self,
        person_roles: &[(i64, String)],
        asset_type: &str,
        asset_ref: &str,
        confidence: f64,
    ) -> Result<usize> {
        let mut tx = self.pool().begin().await?;
        let mut linked = 0usize;
        for (person_id, role) in person_roles {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO person_assets
                    (person_id, asset_type, asset_ref, role, confidence)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(person_id)
            .bind(asset_type)
            .bind(asset_ref)
            .bind(role)
            .bind(confidence)
            .execute(&mut *tx)
            .await?;
            linked += result.rows_affected() as usize;
        }
        tx.commit().await?;
        debug!("Linked {} persons to asset {}", linked, asset_ref);
        Ok(linked)
    }

    /// Asset refs linked to a person, optionally filtered by type
    pub async fn get_person_asset_refs(
        &self,
        person_id: i64,
        asset_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<PersonAsset>> {
        let links = match asset_type {
            Some(t) => {
                sqlx::query_as::<_, PersonAsset>(
                    r#"
                    SELECT person_id, asset_type, asset_ref, role, confidence
                    FROM person_assets
                    WHERE person_id = ? AND asset_type = ?
                    ORDER BY created_at DESC LIMIT ?
                    "#,
                )
                .bind(person_id)
                .bind(t)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, PersonAsset>(
                    r#"
                    SELECT person_id, asset_type, asset_ref, role, confidence
                    FROM person_assets
                    WHERE person_id = ?
                    ORDER BY created_at DESC LIMIT ?
                    "#,
                )
                .bind(person_id)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
        };
        Ok(links)
    }

    /// Persons linked to an asset with their roles
    pub async fn get_asset_person_ids(&self, asset_ref: &str) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query(
            "SELECT person_id, role FROM person_assets WHERE asset_ref = ?",
        )
        .bind(asset_ref)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("person_id"), r.get("role")))
            .collect())
    }

    /// Asset counts by type for one person
    pub async fn get_person_asset_count(&self, person_id: i64) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT asset_type, COUNT(*) as cnt FROM person_assets WHERE person_id = ? GROUP BY asset_type",
        )
        .bind(person_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("asset_type"), r.get("cnt")))
            .collect())
    }

    pub async fn delete_person_asset(
        &self,
        person_id: i64,
        asset_ref: &str,
        role: Option<&str>,
    ) -> Result<bool> {
        let result = match role {
            Some(r) => {
                sqlx::query(
                    "DELETE FROM person_assets WHERE person_id = ? AND asset_ref = ? AND role = ?",
                )
                .bind(person_id)
                .bind(asset_ref)
                .bind(r)
                .execute(self.pool())
                .await?
            }
            None => {
                sqlx::query("DELETE FROM person_assets WHERE person_id = ? AND asset_ref = ?")
                    .bind(person_id)
                    .bind(asset_ref)
                    .execute(self.pool())
                    .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // ASSET ↔ ASSET EDGES
    // ========================================================================

    /// Add a directional edge between two assets. Duplicates are ignored.
    pub async fn link_assets(
        &self,
        src_asset_ref: &str,
        dst_asset_ref: &str,
        relation_type: &str,
        confidence: f64,
        provenance: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO asset_asset_edges
                (src_asset_ref, dst_asset_ref, relation_type, confidence, provenance)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(src_asset_ref)
        .bind(dst_asset_ref)
        .bind(relation_type)
        .bind(confidence)
        .bind(provenance)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Add a batch of edges inside one transaction
    pub async fn link_assets_batch(&self, edges: &[AssetEdge]) -> Result<usize> {
        let mut tx = self.pool().begin().await?;
        let mut added = 0usize;
        for edge in edges {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO asset_asset_edges
                    (src_asset_ref, dst_asset_ref, relation_type, confidence, provenance)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&edge.src_asset_ref)
            .bind(&edge.dst_asset_ref)
            .bind(&edge.relation_type)
            .bind(edge.confidence)
            .bind(&edge.provenance)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(added)
    }

    /// Neighboring assets reachable over edges, respecting edge direction
    pub async fn get_asset_neighbors(
        &self,
        asset_ref: &str,
        relation_type: Option<&str>,
        direction: EdgeDirection,
    ) -> Result<Vec<AssetEdge>> {
        let base = match direction {
            EdgeDirection::Outgoing => {
                "SELECT src_asset_ref, dst_asset_ref, relation_type, confidence, provenance \
                 FROM asset_asset_edges WHERE src_asset_ref = ?"
            }
            EdgeDirection::Incoming => {
                "SELECT src_asset_ref, dst_asset_ref, relation_type, confidence, provenance \
                 FROM asset_asset_edges WHERE dst_asset_ref = ?"
            }
            EdgeDirection::Both => {
                "SELECT src_asset_ref, dst_asset_ref, relation_type, confidence, provenance \
                 FROM asset_asset_edges WHERE (src_asset_ref = ? OR dst_asset_ref = ?)"
            }
        };

        let query = match relation_type {
            Some(_) => format!("{} AND relation_type = ?", base),
            None => base.to_string(),
        };

        let mut q = sqlx::query_as::<_, AssetEdge>(&query).bind(asset_ref);
        if direction == EdgeDirection::Both {
            q = q.bind(asset_ref);
        }
        if let Some(t) = relation_type {
            q = q.bind(t);
        }

        Ok(q.fetch_all(self.pool()).await?)
    }

    /// Assets that are members of a thread (edges with relation
    /// `thread_member` pointing at the thread ref)
    pub async fn get_thread_members(&self, thread_ref: &str) -> Result<Vec<String>> {
        let members = sqlx::query_scalar::<_, String>(
            r#"
            SELECT src_asset_ref FROM asset_asset_edges
            WHERE dst_asset_ref = ? AND relation_type = 'thread_member'
            ORDER BY created_at
            "#,
        )
        .bind(thread_ref)
        .fetch_all(self.pool())
        .await?;
        Ok(members)
    }

    pub async fn delete_asset_edge(
        &self,
        src_asset_ref: &str,
        dst_asset_ref: &str,
        relation_type: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM asset_asset_edges WHERE src_asset_ref = ? AND dst_asset_ref = ? AND relation_type = ?",
        )
        .bind(src_asset_ref)
        .bind(dst_asset_ref)
        .bind(relation_type)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Edge counts by relation type
    pub async fn get_asset_edge_stats(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT relation_type, COUNT(*) as cnt FROM asset_asset_edges GROUP BY relation_type",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("relation_type"), r.get("cnt")))
            .collect())
    }
}
