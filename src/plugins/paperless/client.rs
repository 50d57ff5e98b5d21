// src/plugins/paperless/client.rs
// Thin REST client for the document management system

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PaperlessDocument {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub correspondent_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<i64>,
    /// Unix timestamp of the document's created date
    #[serde(default)]
    pub created: i64,
}

#[derive(Debug, Deserialize)]
struct DocumentListResponse {
    #[serde(default)]
    results: Vec<DocumentListEntry>,
}

#[derive(Debug, Deserialize)]
struct DocumentListEntry {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TagResponse {
    id: i64,
}

#[derive(Clone)]
pub struct PaperlessClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl PaperlessClient {
    pub fn new(base_url: String, api_token: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_token,
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Token {}", self.api_token))
    }

    /// Document ids not yet carrying the processed tag
    pub async fn list_document_ids(
        &self,
        exclude_tag_id: Option<i64>,
        max_results: usize,
    ) -> Result<Vec<i64>> {
        let mut request = self
            .auth(self.client.get(format!("{}/api/documents/", self.base_url)))
            .query(&[("page_size", max_results.to_string())]);
        if let Some(tag_id) = exclude_tag_id {
            request = request.query(&[("tags__id__none", tag_id.to_string())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Paperless API error: {}", response.status()));
        }
        let list: DocumentListResponse = response.json().await?;
        Ok(list.results.into_iter().map(|d| d.id).collect())
    }

    pub async fn get_document(&self, id: i64) -> Result<PaperlessDocument> {
        let response = self
            .auth(
                self.client
                    .get(format!("{}/api/documents/{}/", self.base_url, id)),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Paperless API error fetching {}: {}",
                id,
                response.status()
            ));
        }
        Ok(response.json().await?)
    }

    /// Find or create the processed-marker tag, returning its id
    pub async fn ensure_tag(&self, name: &str) -> Result<i64> {
        let response = self
            .auth(self.client.post(format!("{}/api/tags/", self.base_url)))
            .json(&serde_json::json!({"name": name}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Paperless API error creating tag: {}", response.status()));
        }
        let tag: TagResponse = response.json().await?;
        Ok(tag.id)
    }

    /// Add the processed tag to a document
    pub async fn add_tag(&self, document_id: i64, tag_id: i64) -> Result<()> {
        let response = self
            .auth(
                self.client
                    .patch(format!("{}/api/documents/{}/", self.base_url, document_id)),
            )
            .json(&serde_json::json!({"add_tags": [tag_id]}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Paperless API error tagging {}: {}",
                document_id,
                response.status()
            ));
        }
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let response = self
            .auth(self.client.get(format!("{}/api/documents/", self.base_url)))
            .query(&[("page_size", "1")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Paperless API error: {}", response.status()));
        }
        Ok(())
    }
}
