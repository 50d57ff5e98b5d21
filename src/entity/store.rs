// src/entity/store.rs
// Persistent person store with identifier-cascade dedup and merge support

use anyhow::{anyhow, Result};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, info};

use super::script::{
    build_display_name, compute_display_name, detect_script, is_valid_person_name, normalize_phone,
};
use super::types::*;

/// Storage layer for the person-entity graph
#[derive(Clone)]
pub struct EntityStore {
    pool: SqlitePool,
}

impl EntityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // SCHEMA
    // ========================================================================

    /// Create entity tables if they don't exist. Safe to call repeatedly;
    /// also runs additive migrations.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS persons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                canonical_name TEXT NOT NULL,
                whatsapp_id TEXT,
                phone TEXT,
                email TEXT,
                is_group BOOLEAN DEFAULT FALSE,
                confidence REAL DEFAULT 0.5,
                first_seen TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                last_seen TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(canonical_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS person_aliases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                person_id INTEGER NOT NULL,
                alias TEXT NOT NULL,
                script TEXT DEFAULT 'unknown',
                source TEXT DEFAULT 'auto',
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (person_id) REFERENCES persons(id) ON DELETE CASCADE,
                UNIQUE(person_id, alias)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS person_facts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                person_id INTEGER NOT NULL,
                fact_key TEXT NOT NULL,
                fact_value TEXT NOT NULL,
                confidence REAL DEFAULT 0.5,
                source_type TEXT DEFAULT 'extracted',
                source_ref TEXT,
                extracted_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (person_id) REFERENCES persons(id) ON DELETE CASCADE,
                UNIQUE(person_id, fact_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS person_relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                person_id INTEGER NOT NULL,
                related_person_id INTEGER NOT NULL,
                relationship_type TEXT NOT NULL,
                confidence REAL DEFAULT 0.5,
                source_ref TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (person_id) REFERENCES persons(id) ON DELETE CASCADE,
                FOREIGN KEY (related_person_id) REFERENCES persons(id) ON DELETE CASCADE,
                UNIQUE(person_id, related_person_id, relationship_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS person_assets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                person_id INTEGER NOT NULL,
                asset_type TEXT NOT NULL,
                asset_ref TEXT NOT NULL,
                role TEXT DEFAULT 'sender',
                confidence REAL DEFAULT 1.0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (person_id) REFERENCES persons(id) ON DELETE CASCADE,
                UNIQUE(person_id, asset_ref, role)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS asset_asset_edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                src_asset_ref TEXT NOT NULL,
                dst_asset_ref TEXT NOT NULL,
                relation_type TEXT NOT NULL,
                confidence REAL DEFAULT 1.0,
                provenance TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(src_asset_ref, dst_asset_ref, relation_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_persons_whatsapp ON persons(whatsapp_id)",
            "CREATE INDEX IF NOT EXISTS idx_persons_name ON persons(canonical_name)",
            "CREATE INDEX IF NOT EXISTS idx_persons_phone ON persons(phone)",
            "CREATE INDEX IF NOT EXISTS idx_persons_email ON persons(email)",
            "CREATE INDEX IF NOT EXISTS idx_aliases_alias ON person_aliases(alias COLLATE NOCASE)",
            "CREATE INDEX IF NOT EXISTS idx_aliases_person ON person_aliases(person_id)",
            "CREATE INDEX IF NOT EXISTS idx_facts_person ON person_facts(person_id)",
            "CREATE INDEX IF NOT EXISTS idx_facts_key ON person_facts(fact_key)",
            "CREATE INDEX IF NOT EXISTS idx_person_assets_person ON person_assets(person_id)",
            "CREATE INDEX IF NOT EXISTS idx_person_assets_ref ON person_assets(asset_ref)",
            "CREATE INDEX IF NOT EXISTS idx_person_assets_type ON person_assets(asset_type)",
            "CREATE INDEX IF NOT EXISTS idx_aae_src ON asset_asset_edges(src_asset_ref)",
            "CREATE INDEX IF NOT EXISTS idx_aae_dst ON asset_asset_edges(dst_asset_ref)",
            "CREATE INDEX IF NOT EXISTS idx_aae_type ON asset_asset_edges(relation_type)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        // Additive migration for databases created before source quotes
        self.add_column_if_absent("person_facts", "source_quote", "TEXT")
            .await?;

        info!("Entity database tables initialized");
        Ok(())
    }

    async fn add_column_if_absent(&self, table: &str, column: &str, definition: &str) -> Result<()> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
            .fetch_all(&self.pool)
            .await?;
        let exists = rows
            .iter()
            .any(|r| r.get::<String, _>("name") == column);
        if !exists {
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table, column, definition
            ))
            .execute(&self.pool)
            .await?;
            info!("Migration: added {} column to {} table", column, table);
        }
        Ok(())
    }

    // ========================================================================
    // LOOKUPS
    // ========================================================================

    /// Find a person ID by phone number (normalized comparison).
    /// Falls back to numeric-script aliases.
    pub async fn find_person_by_phone(&self, phone: &str) -> Result<Option<i64>> {
        let normalized = normalize_phone(phone);
        if normalized.is_empty() {
            return Ok(None);
        }

        let rows = sqlx::query("SELECT id, phone FROM persons WHERE phone IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;
        for row in &rows {
            let stored: String = row.get("phone");
            if normalize_phone(&stored) == normalized {
                return Ok(Some(row.get("id")));
            }
        }

        let alias_rows =
            sqlx::query("SELECT person_id, alias FROM person_aliases WHERE script = 'numeric'")
                .fetch_all(&self.pool)
                .await?;
        for row in &alias_rows {
            let stored: String = row.get("alias");
            if normalize_phone(&stored) == normalized {
                return Ok(Some(row.get("person_id")));
            }
        }

        Ok(None)
    }

    /// Find a person ID by email (case-insensitive, checks both the email
    /// column and the 'email' fact)
    pub async fn find_person_by_email(&self, email: &str) -> Result<Option<i64>> {
        let email_lower = email.trim().to_lowercase();
        if email_lower.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query_scalar::<_, i64>("SELECT id FROM persons WHERE LOWER(email) = ?")
            .bind(&email_lower)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(id) = row {
            return Ok(Some(id));
        }

        let fact_row = sqlx::query_scalar::<_, i64>(
            "SELECT person_id FROM person_facts WHERE fact_key = 'email' AND LOWER(fact_value) = ?",
        )
        .bind(&email_lower)
        .fetch_optional(&self.pool)
        .await?;

        Ok(fact_row)
    }

    pub async fn get_person_by_whatsapp_id(&self, whatsapp_id: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM persons WHERE whatsapp_id = ?")
            .bind(whatsapp_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    // ========================================================================
    // GET / CREATE
    // ========================================================================

    /// Get a person ID using the identifier cascade, or create a new record.
    ///
    /// Lookup priority: phone → email → canonical name. On a match, NULL
    /// identifier fields are filled in, last_seen is touched, the incoming
    /// name is added as an alias when different, and bilingual display-name
    /// synthesis is attempted. On a miss a new person is inserted with
    /// auto-created aliases (full name + first token).
    pub async fn get_or_create_person(
        &self,
        canonical_name: &str,
        whatsapp_id: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
        is_group: bool,
    ) -> Result<i64> {
        // A linked-id (@lid) carries digits that are not a phone number;
        // drop the phone when it is just the LID digits.
        let mut phone = phone;
        if let (Some(p), Some(wid)) = (phone, whatsapp_id) {
            if wid.ends_with("@lid") {
                let lid_digits = wid.trim_end_matches("@lid");
                if p.trim_start_matches('+') == lid_digits {
                    phone = None;
                }
            }
        }

        let mut person_id: Option<i64> = None;

        if let Some(p) = phone {
            if !is_group {
                person_id = self.find_person_by_phone(p).await?;
            }
        }
        if person_id.is_none() {
            if let Some(e) = email {
                if !is_group {
                    person_id = self.find_person_by_email(e).await?;
                }
            }
        }
        if person_id.is_none() {
            person_id =
                sqlx::query_scalar::<_, i64>("SELECT id FROM persons WHERE canonical_name = ?")
                    .bind(canonical_name)
                    .fetch_optional(&self.pool)
                    .await?;
        }

        if let Some(id) = person_id {
            sqlx::query(
                r#"
                UPDATE persons SET
                    whatsapp_id = COALESCE(whatsapp_id, ?),
                    phone = COALESCE(phone, ?),
                    email = COALESCE(email, ?),
                    last_seen = CURRENT_TIMESTAMP
                WHERE id = ?
                "#,
            )
            .bind(whatsapp_id)
            .bind(phone)
            .bind(email)
            .bind(id)
            .execute(&self.pool)
            .await?;

            let existing_name =
                sqlx::query_scalar::<_, String>("SELECT canonical_name FROM persons WHERE id = ?")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?;
            if existing_name != canonical_name {
                self.insert_alias_ignore(id, canonical_name, "auto").await?;
            }

            self.refresh_display_name(id).await?;
            return Ok(id);
        }

        let result = sqlx::query(
            "INSERT INTO persons (canonical_name, whatsapp_id, phone, email, is_group) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(canonical_name)
        .bind(whatsapp_id)
        .bind(phone)
        .bind(email)
        .bind(is_group)
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();

        self.auto_create_aliases(id, canonical_name).await?;
        debug!("Created person {}: {}", id, canonical_name);
        Ok(id)
    }

    async fn insert_alias_ignore(&self, person_id: i64, alias: &str, source: &str) -> Result<()> {
        let script = detect_script(alias);
        sqlx::query(
            "INSERT OR IGNORE INTO person_aliases (person_id, alias, script, source) VALUES (?, ?, ?, ?)",
        )
        .bind(person_id)
        .bind(alias)
        .bind(script.as_str())
        .bind(source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Auto-create aliases from a canonical name: the full name plus the
    /// first token.
    async fn auto_create_aliases(&self, person_id: i64, canonical_name: &str) -> Result<()> {
        let trimmed = canonical_name.trim();
        let mut aliases: BTreeSet<&str> = BTreeSet::new();
        aliases.insert(trimmed);
        if let Some(first) = trimmed.split_whitespace().next() {
            aliases.insert(first);
        }
        for alias in aliases {
            self.insert_alias_ignore(person_id, alias, "auto").await?;
        }
        Ok(())
    }

    /// Recompute and persist the bilingual display name. Only persisted
    /// when no other person already carries the exact string.
    pub async fn refresh_display_name(&self, person_id: i64) -> Result<Option<String>> {
        let canonical =
            sqlx::query_scalar::<_, String>("SELECT canonical_name FROM persons WHERE id = ?")
                .bind(person_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(canonical) = canonical else {
            return Ok(None);
        };

        let aliases = self.get_aliases(person_id).await?;
        let Some(new_name) = build_display_name(&canonical, &aliases) else {
            return Ok(None);
        };

        let taken = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM persons WHERE canonical_name = ? AND id != ?",
        )
        .bind(&new_name)
        .bind(person_id)
        .fetch_optional(&self.pool)
        .await?;
        if taken.is_some() {
            return Ok(None);
        }

        sqlx::query(
            "UPDATE persons SET canonical_name = ?, last_updated = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(&new_name)
        .bind(person_id)
        .execute(&self.pool)
        .await?;
        info!("Updated display name for person {}: {}", person_id, new_name);
        Ok(Some(new_name))
    }

    // ========================================================================
    // READ
    // ========================================================================

    pub async fn get_aliases(&self, person_id: i64) -> Result<Vec<Alias>> {
        let aliases = sqlx::query_as::<_, Alias>(
            "SELECT id, alias, script, source FROM person_aliases WHERE person_id = ?",
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(aliases)
    }

    /// Get a person with aliases, facts, relationships, asset counts and
    /// the computed display name
    pub async fn get_person(&self, person_id: i64) -> Result<Option<PersonDetail>> {
        let person = sqlx::query_as::<_, Person>("SELECT * FROM persons WHERE id = ?")
            .bind(person_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(person) = person else {
            return Ok(None);
        };

        let aliases = self.get_aliases(person_id).await?;
        let display_name = compute_display_name(&person.canonical_name, &aliases);

        let facts_detail = sqlx::query_as::<_, FactDetail>(
            r#"
            SELECT fact_key, fact_value, confidence, source_type, source_ref, source_quote, extracted_at
            FROM person_facts WHERE person_id = ?
            "#,
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await?;
        let facts: HashMap<String, String> = facts_detail
            .iter()
            .map(|f| (f.fact_key.clone(), f.fact_value.clone()))
            .collect();

        let relationships = sqlx::query_as::<_, RelationshipView>(
            r#"
            SELECT r.related_person_id, p.canonical_name AS related_name,
                   r.relationship_type, r.confidence
            FROM person_relationships r
            JOIN persons p ON p.id = r.related_person_id
            WHERE r.person_id = ?
            "#,
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await?;

        let asset_rows = sqlx::query(
            "SELECT asset_type, COUNT(*) as cnt FROM person_assets WHERE person_id = ? GROUP BY asset_type",
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await?;
        let asset_counts: HashMap<String, i64> = asset_rows
            .iter()
            .map(|r| (r.get::<String, _>("asset_type"), r.get::<i64, _>("cnt")))
            .collect();

        Ok(Some(PersonDetail {
            person,
            display_name,
            aliases,
            facts,
            facts_detail,
            relationships,
            asset_counts,
        }))
    }

    /// Summary rows for all persons (list view)
    pub async fn get_all_persons_summary(&self) -> Result<Vec<PersonSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.canonical_name, p.is_group,
                   (SELECT COUNT(*) FROM person_aliases a WHERE a.person_id = p.id) as alias_count,
                   (SELECT COUNT(*) FROM person_facts f WHERE f.person_id = p.id) as fact_count,
                   (SELECT COUNT(*) FROM person_relationships r WHERE r.person_id = p.id) as rel_count
            FROM persons p
            ORDER BY p.canonical_name COLLATE NOCASE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let canonical_name: String = row.get("canonical_name");
            let aliases = self.get_aliases(id).await?;
            summaries.push(PersonSummary {
                display_name: compute_display_name(&canonical_name, &aliases),
                id,
                canonical_name,
                is_group: row.get("is_group"),
                alias_count: row.get("alias_count"),
                fact_count: row.get("fact_count"),
                relationship_count: row.get("rel_count"),
            });
        }
        Ok(summaries)
    }

    /// LIKE search over canonical names and aliases
    pub async fn search_persons(&self, query: &str, limit: i64) -> Result<Vec<PersonSummary>> {
        let pattern = format!("%{}%", query.trim());
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT p.id, p.canonical_name, p.is_group,
                   (SELECT COUNT(*) FROM person_aliases a2 WHERE a2.person_id = p.id) as alias_count,
                   (SELECT COUNT(*) FROM person_facts f WHERE f.person_id = p.id) as fact_count,
                   (SELECT COUNT(*) FROM person_relationships r WHERE r.person_id = p.id) as rel_count
            FROM persons p
            LEFT JOIN person_aliases a ON a.person_id = p.id
            WHERE p.canonical_name LIKE ? COLLATE NOCASE
               OR a.alias LIKE ? COLLATE NOCASE
            ORDER BY p.canonical_name COLLATE NOCASE
            LIMIT ?
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let canonical_name: String = row.get("canonical_name");
            let aliases = self.get_aliases(id).await?;
            results.push(PersonSummary {
                display_name: compute_display_name(&canonical_name, &aliases),
                id,
                canonical_name,
                is_group: row.get("is_group"),
                alias_count: row.get("alias_count"),
                fact_count: row.get("fact_count"),
                relationship_count: row.get("rel_count"),
            });
        }
        Ok(results)
    }

    /// Candidate persons matching a name against canonical names or
    /// aliases, case-insensitive
    pub async fn resolve_name(&self, name: &str) -> Result<Vec<i64>> {
        let rows = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT p.id
            FROM persons p
            LEFT JOIN person_aliases a ON a.person_id = p.id
            WHERE p.canonical_name = ? COLLATE NOCASE
               OR a.alias = ? COLLATE NOCASE
            "#,
        )
        .bind(name)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    pub async fn rename_person(&self, person_id: i64, new_name: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE persons SET canonical_name = ?, last_updated = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(new_name)
        .bind(person_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_person(&self, person_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM persons WHERE id = ?")
            .bind(person_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_alias(&self, person_id: i64, alias: &str, source: &str) -> Result<()> {
        self.insert_alias_ignore(person_id, alias, source).await
    }

    pub async fn delete_alias(&self, alias_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM person_aliases WHERE id = ?")
            .bind(alias_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Upsert a fact. Confidence is the only write arbiter:
    /// - no existing fact → insert
    /// - new confidence strictly greater → overwrite value + metadata
    /// - equal → overwrite value, touch timestamp
    /// - lower → no-op
    ///
    /// A stored fact's confidence never decreases.
    pub async fn set_fact(
        &self,
        person_id: i64,
        key: &str,
        value: &str,
        confidence: f64,
        source_type: &str,
        source_ref: Option<&str>,
        source_quote: Option<&str>,
    ) -> Result<bool> {
        let existing = sqlx::query_scalar::<_, f64>(
            "SELECT confidence FROM person_facts WHERE person_id = ? AND fact_key = ?",
        )
        .bind(person_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO person_facts
                        (person_id, fact_key, fact_value, confidence, source_type, source_ref, source_quote)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(person_id)
                .bind(key)
                .bind(value)
                .bind(confidence)
                .bind(source_type)
                .bind(source_ref)
                .bind(source_quote)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
            Some(prior) if confidence > prior => {
                sqlx::query(
                    r#"
                    UPDATE person_facts
                    SET fact_value = ?, confidence = ?, source_type = ?,
                        source_ref = ?, source_quote = ?, extracted_at = CURRENT_TIMESTAMP
                    WHERE person_id = ? AND fact_key = ?
                    "#,
                )
                .bind(value)
                .bind(confidence)
                .bind(source_type)
                .bind(source_ref)
                .bind(source_quote)
                .bind(person_id)
                .bind(key)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
            Some(prior) if (confidence - prior).abs() < f64::EPSILON => {
                sqlx::query(
                    r#"
                    UPDATE person_facts
                    SET fact_value = ?, extracted_at = CURRENT_TIMESTAMP
                    WHERE person_id = ? AND fact_key = ?
                    "#,
                )
                .bind(value)
                .bind(person_id)
                .bind(key)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    pub async fn get_fact(&self, person_id: i64, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT fact_value FROM person_facts WHERE person_id = ? AND fact_key = ?",
        )
        .bind(person_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    pub async fn get_all_facts(&self, person_id: i64) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(
            "SELECT fact_key, fact_value FROM person_facts WHERE person_id = ?",
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("fact_key"), r.get("fact_value")))
            .collect())
    }

    pub async fn delete_fact(&self, person_id: i64, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM person_facts WHERE person_id = ? AND fact_key = ?")
            .bind(person_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Distinct fact keys across all persons (UI autocomplete)
    pub async fn get_fact_keys(&self) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT fact_key FROM person_facts ORDER BY fact_key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    pub async fn add_relationship(
        &self,
        person_id: i64,
        related_person_id: i64,
        relationship_type: &str,
        confidence: f64,
        source_ref: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO person_relationships
                (person_id, related_person_id, relationship_type, confidence, source_ref)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(person_id)
        .bind(related_person_id)
        .bind(relationship_type)
        .bind(confidence)
        .bind(source_ref)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// BFS over relationships in both directions up to `depth` hops,
    /// returning a de-duplicated id set including the originals.
    pub async fn expand_person_ids_with_relationships(
        &self,
        ids: &[i64],
        depth: usize,
    ) -> Result<Vec<i64>> {
        let mut seen: HashSet<i64> = ids.iter().copied().collect();
        let mut frontier: VecDeque<i64> = ids.iter().copied().collect();

        for _ in 0..depth {
            let mut next_frontier = VecDeque::new();
            while let Some(id) = frontier.pop_front() {
                let neighbors = sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT related_person_id FROM person_relationships WHERE person_id = ?
                    UNION
                    SELECT person_id FROM person_relationships WHERE related_person_id = ?
                    "#,
                )
                .bind(id)
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

                for neighbor in neighbors {
                    if seen.insert(neighbor) {
                        next_frontier.push_back(neighbor);
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        let mut result: Vec<i64> = seen.into_iter().collect();
        result.sort_unstable();
        Ok(result)
    }

    // ========================================================================
    // MERGE
    // ========================================================================

    /// Merge source persons into a target. Each source is absorbed inside
    /// its own transaction: aliases (INSERT OR IGNORE), facts (confidence
    /// rule), forward relationships (INSERT OR IGNORE), reverse
    /// relationships (delete colliding edges first, then re-point the
    /// rest), identifiers (COALESCE into target), then the source row is
    /// deleted (cascading its children).
    pub async fn merge_persons(&self, target_id: i64, source_ids: &[i64]) -> Result<MergeOutcome> {
        let target_name =
            sqlx::query_scalar::<_, String>("SELECT canonical_name FROM persons WHERE id = ?")
                .bind(target_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| anyhow!("Target person {} not found", target_id))?;

        // Merging a person into itself is a no-op
        let source_ids: Vec<i64> = source_ids
            .iter()
            .copied()
            .filter(|&id| id != target_id)
            .collect();
        if source_ids.is_empty() {
            return Ok(MergeOutcome {
                target_id,
                aliases_moved: 0,
                facts_moved: 0,
                relationships_moved: 0,
                sources_deleted: 0,
                display_name: target_name,
            });
        }

        let mut aliases_moved = 0i64;
        let mut facts_moved = 0i64;
        let mut rels_moved = 0i64;
        let mut sources_deleted = 0i64;

        for source_id in source_ids {
            let mut tx = self.pool.begin().await?;

            let source = sqlx::query(
                "SELECT canonical_name, phone, email, whatsapp_id FROM persons WHERE id = ?",
            )
            .bind(source_id)
            .fetch_optional(&mut *tx)
            .await?;
            let Some(source) = source else {
                tx.rollback().await?;
                continue;
            };

            // 1. Aliases — re-point to target, skip duplicates
            let source_aliases =
                sqlx::query("SELECT alias, script, source FROM person_aliases WHERE person_id = ?")
                    .bind(source_id)
                    .fetch_all(&mut *tx)
                    .await?;
            for row in &source_aliases {
                let result = sqlx::query(
                    "INSERT OR IGNORE INTO person_aliases (person_id, alias, script, source) VALUES (?, ?, ?, ?)",
                )
                .bind(target_id)
                .bind(row.get::<String, _>("alias"))
                .bind(row.get::<String, _>("script"))
                .bind(row.get::<String, _>("source"))
                .execute(&mut *tx)
                .await?;
                aliases_moved += result.rows_affected() as i64;
            }

            // The source's canonical name becomes an alias on the target
            let source_name: String = source.get("canonical_name");
            sqlx::query(
                "INSERT OR IGNORE INTO person_aliases (person_id, alias, script, source) VALUES (?, ?, ?, 'merge')",
            )
            .bind(target_id)
            .bind(&source_name)
            .bind(detect_script(&source_name).as_str())
            .execute(&mut *tx)
            .await?;

            // 2. Facts — confidence rule decides
            let source_facts = sqlx::query(
                "SELECT fact_key, fact_value, confidence, source_type, source_ref, source_quote FROM person_facts WHERE person_id = ?",
            )
            .bind(source_id)
            .fetch_all(&mut *tx)
            .await?;
            for fact in &source_facts {
                let key: String = fact.get("fact_key");
                let conf: f64 = fact.get("confidence");
                let existing = sqlx::query_scalar::<_, f64>(
                    "SELECT confidence FROM person_facts WHERE person_id = ? AND fact_key = ?",
                )
                .bind(target_id)
                .bind(&key)
                .fetch_optional(&mut *tx)
                .await?;

                match existing {
                    None => {
                        sqlx::query(
                            r#"
                            INSERT INTO person_facts
                                (person_id, fact_key, fact_value, confidence, source_type, source_ref, source_quote)
                            VALUES (?, ?, ?, ?, ?, ?, ?)
                            "#,
                        )
                        .bind(target_id)
                        .bind(&key)
                        .bind(fact.get::<String, _>("fact_value"))
                        .bind(conf)
                        .bind(fact.get::<String, _>("source_type"))
                        .bind(fact.get::<Option<String>, _>("source_ref"))
                        .bind(fact.get::<Option<String>, _>("source_quote"))
                        .execute(&mut *tx)
                        .await?;
                        facts_moved += 1;
                    }
                    Some(prior) if conf > prior => {
                        sqlx::query(
                            r#"
                            UPDATE person_facts
                            SET fact_value = ?, confidence = ?, source_type = ?,
                                source_ref = ?, source_quote = ?, extracted_at = CURRENT_TIMESTAMP
                            WHERE person_id = ? AND fact_key = ?
                            "#,
                        )
                        .bind(fact.get::<String, _>("fact_value"))
                        .bind(conf)
                        .bind(fact.get::<String, _>("source_type"))
                        .bind(fact.get::<Option<String>, _>("source_ref"))
                        .bind(fact.get::<Option<String>, _>("source_quote"))
                        .bind(target_id)
                        .bind(&key)
                        .execute(&mut *tx)
                        .await?;
                        facts_moved += 1;
                    }
                    Some(_) => {}
                }
            }

            // 3. Forward relationships — re-point to target
            let source_rels = sqlx::query(
                "SELECT related_person_id, relationship_type, confidence, source_ref FROM person_relationships WHERE person_id = ?",
            )
            .bind(source_id)
            .fetch_all(&mut *tx)
            .await?;
            for rel in &source_rels {
                let related_id: i64 = rel.get("related_person_id");
                if related_id == target_id {
                    continue;
                }
                let result = sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO person_relationships
                        (person_id, related_person_id, relationship_type, confidence, source_ref)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(target_id)
                .bind(related_id)
                .bind(rel.get::<String, _>("relationship_type"))
                .bind(rel.get::<f64, _>("confidence"))
                .bind(rel.get::<Option<String>, _>("source_ref"))
                .execute(&mut *tx)
                .await?;
                rels_moved += result.rows_affected() as i64;
            }

            // Reverse relationships: delete edges that would collide with
            // the target's existing (person_id, type) tuples, then
            // re-point the remainder.
            sqlx::query(
                r#"
                DELETE FROM person_relationships
                WHERE related_person_id = ?
                  AND person_id != ?
                  AND (person_id, relationship_type) IN (
                      SELECT person_id, relationship_type
                      FROM person_relationships
                      WHERE related_person_id = ?
                  )
                "#,
            )
            .bind(source_id)
            .bind(target_id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                r#"
                UPDATE OR IGNORE person_relationships
                SET related_person_id = ?
                WHERE related_person_id = ? AND person_id != ?
                "#,
            )
            .bind(target_id)
            .bind(source_id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;

            // 4. Absorb identifiers where the target's are NULL
            sqlx::query(
                r#"
                UPDATE persons SET
                    phone = COALESCE(phone, ?),
                    email = COALESCE(email, ?),
                    whatsapp_id = COALESCE(whatsapp_id, ?)
                WHERE id = ?
                "#,
            )
            .bind(source.get::<Option<String>, _>("phone"))
            .bind(source.get::<Option<String>, _>("email"))
            .bind(source.get::<Option<String>, _>("whatsapp_id"))
            .bind(target_id)
            .execute(&mut *tx)
            .await?;

            // 5. Delete the source (cascades aliases, facts, relationships)
            sqlx::query("DELETE FROM persons WHERE id = ?")
                .bind(source_id)
                .execute(&mut *tx)
                .await?;
            sources_deleted += 1;

            sqlx::query("UPDATE persons SET last_updated = CURRENT_TIMESTAMP WHERE id = ?")
                .bind(target_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
        }

        // Recompute the bilingual display name now that aliases moved
        self.refresh_display_name(target_id).await?;

        let display_name =
            sqlx::query_scalar::<_, String>("SELECT canonical_name FROM persons WHERE id = ?")
                .bind(target_id)
                .fetch_optional(&self.pool)
                .await?
                .unwrap_or_default();

        info!(
            "Entity merge: {} persons merged into {} ({} aliases, {} facts, {} rels)",
            sources_deleted, target_id, aliases_moved, facts_moved, rels_moved
        );

        Ok(MergeOutcome {
            target_id,
            aliases_moved,
            facts_moved,
            relationships_moved: rels_moved,
            sources_deleted,
            display_name,
        })
    }

    // ========================================================================
    // MERGE CANDIDATES
    // ========================================================================

    /// Find potential duplicate persons, in priority order: same phone,
    /// same whatsapp id, same email (column or fact), shared multi-word
    /// alias, shared full-name alias across scripts. Groups are
    /// de-duplicated by their id set. Single-token matches are excluded
    /// to avoid first-name false positives.
    pub async fn find_merge_candidates(&self, limit: usize) -> Result<Vec<MergeCandidate>> {
        let mut candidates: Vec<MergeCandidate> = Vec::new();
        let mut seen_groups: HashSet<BTreeSet<i64>> = HashSet::new();

        let add_candidate =
            |candidates: &mut Vec<MergeCandidate>,
             seen: &mut HashSet<BTreeSet<i64>>,
             reason: String,
             ids: Vec<i64>,
             persons: Vec<MiniPerson>| {
                let key: BTreeSet<i64> = ids.iter().copied().collect();
                if key.len() >= 2 && persons.len() >= 2 && seen.insert(key) {
                    candidates.push(MergeCandidate { reason, persons });
                }
            };

        // 1. Same phone number
        let phone_rows = sqlx::query(
            r#"
            SELECT phone, GROUP_CONCAT(id) as ids, COUNT(*) as cnt
            FROM persons WHERE phone IS NOT NULL AND phone != ''
            GROUP BY phone HAVING cnt > 1 LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        for row in phone_rows {
            let ids = parse_id_list(&row.get::<String, _>("ids"));
            let persons = self.get_mini_persons(&ids).await?;
            add_candidate(
                &mut candidates,
                &mut seen_groups,
                format!("Same phone: {}", row.get::<String, _>("phone")),
                ids,
                persons,
            );
        }

        // 2. Same WhatsApp ID
        let wa_rows = sqlx::query(
            r#"
            SELECT whatsapp_id, GROUP_CONCAT(id) as ids, COUNT(*) as cnt
            FROM persons WHERE whatsapp_id IS NOT NULL AND whatsapp_id != ''
            GROUP BY whatsapp_id HAVING cnt > 1 LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        for row in wa_rows {
            let ids = parse_id_list(&row.get::<String, _>("ids"));
            let persons = self.get_mini_persons(&ids).await?;
            add_candidate(
                &mut candidates,
                &mut seen_groups,
                format!("Same WhatsApp: {}", row.get::<String, _>("whatsapp_id")),
                ids,
                persons,
            );
        }

        // 3a. Same email (persons table)
        let email_rows = sqlx::query(
            r#"
            SELECT email, GROUP_CONCAT(id) as ids, COUNT(*) as cnt
            FROM persons WHERE email IS NOT NULL AND email != ''
            GROUP BY LOWER(email) HAVING cnt > 1 LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        for row in email_rows {
            let ids = parse_id_list(&row.get::<String, _>("ids"));
            let persons = self.get_mini_persons(&ids).await?;
            add_candidate(
                &mut candidates,
                &mut seen_groups,
                format!("Same email: {}", row.get::<String, _>("email")),
                ids,
                persons,
            );
        }

        // 3b. Same email via facts
        let email_fact_rows = sqlx::query(
            r#"
            SELECT fact_value, GROUP_CONCAT(person_id) as ids, COUNT(*) as cnt
            FROM person_facts WHERE fact_key = 'email'
            GROUP BY LOWER(fact_value) HAVING cnt > 1 LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        for row in email_fact_rows {
            let ids = parse_id_list(&row.get::<String, _>("ids"));
            let persons = self.get_mini_persons(&ids).await?;
            add_candidate(
                &mut candidates,
                &mut seen_groups,
                format!("Same email (fact): {}", row.get::<String, _>("fact_value")),
                ids,
                persons,
            );
        }

        // 4. Shared multi-word alias (single first names cause too many
        //    false positives)
        let shared_alias_rows = sqlx::query(
            r#"
            SELECT alias, GROUP_CONCAT(DISTINCT person_id) as ids, COUNT(DISTINCT person_id) as cnt
            FROM person_aliases
            WHERE script != 'numeric' AND alias LIKE '% %'
            GROUP BY alias COLLATE NOCASE HAVING cnt > 1 LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        for row in shared_alias_rows {
            let ids = parse_id_list(&row.get::<String, _>("ids"));
            let persons = self.get_mini_persons(&ids).await?;
            add_candidate(
                &mut candidates,
                &mut seen_groups,
                format!("Same alias: \"{}\"", row.get::<String, _>("alias")),
                ids,
                persons,
            );
        }

        // 5. Shared full-name alias across persons: case-insensitive for
        //    latin, exact for hebrew, at least two tokens
        if candidates.len() < limit {
            let all_aliases = sqlx::query(
                "SELECT person_id, alias, script FROM person_aliases WHERE script IN ('hebrew', 'latin')",
            )
            .fetch_all(&self.pool)
            .await?;

            let mut alias_to_persons: HashMap<String, BTreeSet<i64>> = HashMap::new();
            for row in &all_aliases {
                let alias: String = row.get("alias");
                let alias = alias.trim().to_string();
                let script: String = row.get("script");
                if !alias.contains(' ') || alias.chars().count() < 3 {
                    continue;
                }
                let key = if script == "latin" {
                    alias.to_lowercase()
                } else {
                    alias
                };
                alias_to_persons
                    .entry(key)
                    .or_default()
                    .insert(row.get("person_id"));
            }

            let mut shared: Vec<(String, BTreeSet<i64>)> = alias_to_persons
                .into_iter()
                .filter(|(_, ids)| ids.len() >= 2)
                .collect();
            shared.sort_by(|a, b| a.0.cmp(&b.0));

            for (alias_text, id_set) in shared {
                if candidates.len() >= limit {
                    break;
                }
                let ids: Vec<i64> = id_set.iter().copied().collect();
                let persons = self.get_mini_persons(&ids).await?;
                add_candidate(
                    &mut candidates,
                    &mut seen_groups,
                    format!("Same full name: \"{}\"", alias_text),
                    ids,
                    persons,
                );
            }
        }

        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn get_mini_persons(&self, ids: &[i64]) -> Result<Vec<MiniPerson>> {
        let mut result = Vec::with_capacity(ids.len());
        for &id in ids {
            let row = sqlx::query(
                r#"
                SELECT id, canonical_name, phone, email, whatsapp_id,
                       (SELECT COUNT(*) FROM person_aliases WHERE person_id = persons.id) as alias_count,
                       (SELECT COUNT(*) FROM person_facts WHERE person_id = persons.id) as fact_count
                FROM persons WHERE id = ?
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                result.push(MiniPerson {
                    id: row.get("id"),
                    canonical_name: row.get("canonical_name"),
                    phone: row.get("phone"),
                    email: row.get("email"),
                    whatsapp_id: row.get("whatsapp_id"),
                    alias_count: row.get("alias_count"),
                    fact_count: row.get("fact_count"),
                });
            }
        }
        Ok(result)
    }

    // ========================================================================
    // CLEANUP & SEEDING
    // ========================================================================

    /// Delete persons whose canonical name fails the validity predicate
    pub async fn cleanup_garbage_persons(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id, canonical_name FROM persons")
            .fetch_all(&self.pool)
            .await?;

        let mut deleted = Vec::new();
        for row in rows {
            let name: String = row.get("canonical_name");
            if !is_valid_person_name(&name) {
                let id: i64 = row.get("id");
                sqlx::query("DELETE FROM persons WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                deleted.push(name);
            }
        }

        if !deleted.is_empty() {
            info!("Cleanup removed {} garbage persons", deleted.len());
        }
        Ok(deleted)
    }

    /// Bulk upsert contacts with identifier-cascade semantics. System and
    /// broadcast contacts, invalid names and LID phone impostors are
    /// skipped or sanitized.
    pub async fn seed_from_contacts(&self, contacts: &[ContactSeed]) -> Result<SeedOutcome> {
        let mut outcome = SeedOutcome::default();

        for contact in contacts {
            if let Some(wid) = &contact.whatsapp_id {
                if wid.contains("@broadcast") || wid.starts_with("status@") {
                    outcome.skipped += 1;
                    continue;
                }
            }
            if !is_valid_person_name(&contact.name) {
                outcome.skipped += 1;
                continue;
            }

            let existed = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM persons WHERE canonical_name = ?",
            )
            .bind(&contact.name)
            .fetch_optional(&self.pool)
            .await?
            .is_some();

            self.get_or_create_person(
                &contact.name,
                contact.whatsapp_id.as_deref(),
                contact.phone.as_deref(),
                contact.email.as_deref(),
                contact.is_group,
            )
            .await?;

            if existed {
                outcome.updated += 1;
            } else {
                outcome.created += 1;
            }
        }

        info!(
            "Contact seeding: {} created, {} updated, {} skipped",
            outcome.created, outcome.updated, outcome.skipped
        );
        Ok(outcome)
    }

    /// Table counts for the stats endpoint
    pub async fn get_stats(&self) -> Result<HashMap<String, i64>> {
        let mut stats = HashMap::new();
        for (label, table) in [
            ("persons", "persons"),
            ("aliases", "person_aliases"),
            ("facts", "person_facts"),
            ("relationships", "person_relationships"),
            ("person_assets", "person_assets"),
            ("asset_edges", "asset_asset_edges"),
        ] {
            let count =
                sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                    .fetch_one(&self.pool)
                    .await?;
            stats.insert(label.to_string(), count);
        }
        Ok(stats)
    }
}

fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .collect()
}
