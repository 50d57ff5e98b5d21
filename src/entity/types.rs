// src/entity/types.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

/// Writing system of a name or alias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Script {
    Hebrew,
    Latin,
    Mixed,
    Numeric,
    Unknown,
}

impl Script {
    pub fn as_str(&self) -> &'static str {
        match self {
            Script::Hebrew => "hebrew",
            Script::Latin => "latin",
            Script::Mixed => "mixed",
            Script::Numeric => "numeric",
            Script::Unknown => "unknown",
        }
    }
}

/// A person row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub canonical_name: String,
    pub whatsapp_id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_group: bool,
    pub confidence: f64,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Alias {
    pub id: i64,
    pub alias: String,
    pub script: String,
    pub source: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FactDetail {
    pub fact_key: String,
    pub fact_value: String,
    pub confidence: f64,
    pub source_type: String,
    pub source_ref: Option<String>,
    pub source_quote: Option<String>,
    pub extracted_at: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RelationshipView {
    pub related_person_id: i64,
    pub related_name: String,
    pub relationship_type: String,
    pub confidence: f64,
}

/// Full person record with aliases, facts, relationships and asset counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonDetail {
    #[serde(flatten)]
    pub person: Person,
    pub display_name: String,
    pub aliases: Vec<Alias>,
    pub facts: HashMap<String, String>,
    pub facts_detail: Vec<FactDetail>,
    pub relationships: Vec<RelationshipView>,
    pub asset_counts: HashMap<String, i64>,
}

/// Summary row for person lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonSummary {
    pub id: i64,
    pub canonical_name: String,
    pub display_name: String,
    pub is_group: bool,
    pub alias_count: i64,
    pub fact_count: i64,
    pub relationship_count: i64,
}

/// Minimal person info shown inside a merge-candidate group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiniPerson {
    pub id: i64,
    pub canonical_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub whatsapp_id: Option<String>,
    pub alias_count: i64,
    pub fact_count: i64,
}

/// A group of probably-duplicate persons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub reason: String,
    pub persons: Vec<MiniPerson>,
}

/// Result summary of a merge operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub target_id: i64,
    pub aliases_moved: i64,
    pub facts_moved: i64,
    pub relationships_moved: i64,
    pub sources_deleted: i64,
    pub display_name: String,
}

/// A person ↔ asset link
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PersonAsset {
    pub person_id: i64,
    pub asset_type: String,
    pub asset_ref: String,
    pub role: String,
    pub confidence: f64,
}

/// A directional asset ↔ asset edge
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AssetEdge {
    pub src_asset_ref: String,
    pub dst_asset_ref: String,
    pub relation_type: String,
    pub confidence: f64,
    pub provenance: Option<String>,
}

/// Contact record fed to `seed_from_contacts`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSeed {
    pub name: String,
    #[serde(default)]
    pub whatsapp_id: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_group: bool,
}

/// Seeding counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedOutcome {
    pub created: i64,
    pub updated: i64,
    pub skipped: i64,
}
