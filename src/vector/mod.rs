// src/vector/mod.rs

//! Typed facade over the Qdrant vector database.
//!
//! Owns the archive collection: creation with cosine distance, payload
//! indexes (keyword/integer/bool + multilingual full-text), upserts with
//! deterministic ids, filtered scroll with server-side timestamp ordering,
//! similarity search, exact counts, and the `point_exists` dedup predicate
//! that anchors idempotent ingestion.

use anyhow::{Context, Result};
use qdrant_client::qdrant::{
    payload_index_params::IndexParams, point_id::PointIdOptions, CountPointsBuilder,
    CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Direction,
    Distance, FieldType, Filter, OrderBy, PointStruct, RetrievedPoint,
    ScoredPoint, ScrollPointsBuilder, SearchPointsBuilder, TextIndexParams, TokenizerType,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod filters;

pub use filters::{match_keyword, match_text, timestamp_gt, timestamp_range};

/// Payload fields carrying a multilingual full-text index, with per-field
/// token length bounds.
const TEXT_INDEX_FIELDS: [(&str, u64, u64); 3] =
    [("sender", 2, 20), ("chat_name", 2, 30), ("message", 2, 40)];

/// Payload fields carrying plain (keyword/integer/bool) indexes.
const PLAIN_INDEX_FIELDS: [(&str, FieldType); 5] = [
    ("timestamp", FieldType::Integer),
    ("source", FieldType::Keyword),
    ("content_type", FieldType::Keyword),
    ("source_id", FieldType::Keyword),
    ("is_group", FieldType::Bool),
];

/// Thin typed client for the archive collection
pub struct VectorStore {
    client: Qdrant,
    collection: String,
    vector_size: u64,
}

impl VectorStore {
    /// Connect to Qdrant and ensure the collection plus all payload
    /// indexes exist.
    pub async fn new(url: &str, collection: &str, vector_size: u64, timeout_secs: u64) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .timeout(Duration::from_secs(timeout_secs))
            .skip_compatibility_check()
            .build()
            .context("Failed to connect to Qdrant")?;

        let store = Self {
            client,
            collection: collection.to_string(),
            vector_size,
        };

        store.ensure_collection().await?;
        store.ensure_indexes().await;

        Ok(store)
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn ensure_collection(&self) -> Result<()> {
        let exists = self.client.collection_exists(&self.collection).await?;
        if !exists {
            info!("Creating Qdrant collection: {}", self.collection);
            match self
                .client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(self.vector_size, Distance::Cosine),
                    ),
                )
                .await
            {
                Ok(_) => {}
                Err(e) => {
                    // Another process may have created it between the exists
                    // check and the create call
                    if e.to_string().contains("already exists") {
                        debug!("Collection {} already exists", self.collection);
                    } else {
                        return Err(e)
                            .context(format!("Failed to create collection: {}", self.collection));
                    }
                }
            }
        }
        Ok(())
    }

    /// Create all payload indexes. Index creation errors are logged and
    /// swallowed (the index usually already exists).
    async fn ensure_indexes(&self) {
        for (field, field_type) in PLAIN_INDEX_FIELDS {
            let result = self
                .client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    field,
                    field_type,
                ))
                .await;
            match result {
                Ok(_) => info!("Created payload index on '{}'", field),
                Err(e) => debug!("Could not create index on '{}' (may exist): {}", field, e),
            }
        }

        for (field, min_len, max_len) in TEXT_INDEX_FIELDS {
            let params = IndexParams::TextIndexParams(TextIndexParams {
                tokenizer: TokenizerType::Multilingual.into(),
                lowercase: Some(true),
                min_token_len: Some(min_len),
                max_token_len: Some(max_len),
                ..Default::default()
            });
            let result = self
                .client
                .create_field_index(
                    CreateFieldIndexCollectionBuilder::new(&self.collection, field, FieldType::Text)
                        .field_index_params(params),
                )
                .await;
            match result {
                Ok(_) => info!("Created text index on '{}'", field),
                Err(e) => debug!("Could not create text index on '{}' (may exist): {}", field, e),
            }
        }
    }

    /// Check whether a point with the given `source_id` already exists.
    ///
    /// Scroll with limit 1, no payload, no vectors. Failures are treated
    /// as "not found" so ingestion proceeds rather than stalls.
    pub async fn point_exists(&self, source_id: &str) -> bool {
        let filter = Filter::must([match_keyword("source_id", source_id)]);
        match self
            .client
            .scroll(
                ScrollPointsBuilder::new(&self.collection)
                    .filter(filter)
                    .limit(1)
                    .with_payload(false)
                    .with_vectors(false),
            )
            .await
        {
            Ok(response) => !response.result.is_empty(),
            Err(e) => {
                debug!("Dedup check failed (proceeding with insert): {}", e);
                false
            }
        }
    }

    /// Upsert points with user-assigned deterministic ids
    pub async fn upsert(&self, points: Vec<PointStruct>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .context("Failed to upsert points to Qdrant")?;
        Ok(())
    }

    /// Similarity search with a filter
    pub async fn search(
        &self,
        vector: Vec<f32>,
        filter: Option<Filter>,
        limit: u64,
    ) -> Result<Vec<ScoredPoint>> {
        let mut builder =
            SearchPointsBuilder::new(&self.collection, vector, limit).with_payload(true);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }
        let results = self
            .client
            .search_points(builder)
            .await
            .context("Failed to search Qdrant")?;
        Ok(results.result)
    }

    /// Filtered scroll. When `newest_first` is set, orders server-side by
    /// the integer-indexed `timestamp` field, descending.
    pub async fn scroll(
        &self,
        filter: Option<Filter>,
        limit: u32,
        newest_first: bool,
    ) -> Result<Vec<RetrievedPoint>> {
        let mut builder = ScrollPointsBuilder::new(&self.collection)
            .limit(limit)
            .with_payload(true)
            .with_vectors(false);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }
        if newest_first {
            builder = builder.order_by(OrderBy {
                key: "timestamp".to_string(),
                direction: Some(Direction::Desc.into()),
                start_from: None,
            });
        }
        let response = self
            .client
            .scroll(builder)
            .await
            .context("Failed to scroll Qdrant")?;
        Ok(response.result)
    }

    /// Scan the whole collection page by page, feeding each point's payload
    /// to the visitor. Used for label-cache rebuilds.
    pub async fn scan_payloads<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&HashMap<String, qdrant_client::qdrant::Value>),
    {
        let mut offset: Option<qdrant_client::qdrant::PointId> = None;
        let limit = 1000u32;

        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection)
                .limit(limit)
                .with_payload(true)
                .with_vectors(false);
            if let Some(ref off) = offset {
                builder = builder.offset(off.clone());
            }

            let response = self.client.scroll(builder).await?;
            if response.result.is_empty() {
                break;
            }

            for point in &response.result {
                visit(&point.payload);
            }

            offset = response.next_page_offset.clone();
            if offset.is_none() {
                break;
            }
        }

        Ok(())
    }

    /// Exact filtered count
    pub async fn count(&self, filter: Option<Filter>) -> Result<u64> {
        let mut builder = CountPointsBuilder::new(&self.collection).exact(true);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }
        let response = self
            .client
            .count(builder)
            .await
            .context("Failed to count Qdrant points")?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    /// Total number of points in the collection
    pub async fn total_count(&self) -> Result<u64> {
        self.count(None).await
    }

    /// Delete all points matching a filter. Returns the pre-delete count.
    pub async fn delete_by_filter(&self, filter: Filter) -> Result<u64> {
        let count = self.count(Some(filter.clone())).await.unwrap_or(0);
        if count == 0 {
            return Ok(0);
        }
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(filter)
                    .wait(true),
            )
            .await
            .context("Failed to delete points from Qdrant")?;
        Ok(count)
    }

    /// Drop and recreate the collection, then re-create all indexes.
    ///
    /// Callers must invalidate dependent in-memory caches afterwards.
    pub async fn reset(&self) -> Result<()> {
        warn!("Dropping Qdrant collection: {}", self.collection);
        self.client
            .delete_collection(&self.collection)
            .await
            .context("Failed to delete collection")?;

        self.ensure_collection().await?;
        self.ensure_indexes().await;

        info!("Collection reset complete: {}", self.collection);
        Ok(())
    }

    /// Verify connectivity by checking the collection exists
    pub async fn health_check(&self) -> bool {
        match self.client.collection_exists(&self.collection).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Qdrant health check failed: {}", e);
                false
            }
        }
    }

    /// Per-source point counts for the stats endpoint
    pub async fn source_counts(&self, sources: &[&str]) -> HashMap<String, u64> {
        let mut counts = HashMap::new();
        for source in sources {
            let filter = Filter::must([match_keyword("source", source)]);
            let count = self.count(Some(filter)).await.unwrap_or(0);
            counts.insert(source.to_string(), count);
        }
        counts
    }
}

/// Extract a point id as a string (uuid or numeric)
pub fn point_id_string(id: &Option<qdrant_client::qdrant::PointId>) -> Option<String> {
    match id.as_ref()?.point_id_options.as_ref()? {
        PointIdOptions::Num(n) => Some(n.to_string()),
        PointIdOptions::Uuid(u) => Some(u.clone()),
    }
}
