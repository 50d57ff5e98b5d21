// src/plugins/mailbox/client.rs
// Thin REST client for the mail source

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;

/// Parsed email as the mail API returns it
#[derive(Debug, Clone, Deserialize)]
pub struct MailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub to_addresses: Vec<String>,
    /// Unix timestamp of the Date header
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<MailAttachment>,
}

/// Attachment with text already extracted server-side
#[derive(Debug, Clone, Deserialize)]
pub struct MailAttachment {
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub extracted_text: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    id: String,
}

/// Minimal mail-API surface the sync pipeline consumes
#[derive(Clone)]
pub struct MailClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl MailClient {
    pub fn new(base_url: String, api_token: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_token,
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.api_token))
    }

    /// Message ids in the given folders, excluding those carrying the
    /// processed label (the query excludes server-side).
    pub async fn list_message_ids(
        &self,
        folders: &[String],
        exclude_label: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<String>> {
        let mut query = folders
            .iter()
            .map(|f| format!("in:{}", f))
            .collect::<Vec<_>>()
            .join(" OR ");
        if let Some(label) = exclude_label {
            query = format!("({}) -label:{}", query, label);
        }

        let response = self
            .auth(self.client.get(format!("{}/messages", self.base_url)))
            .query(&[("q", query.as_str()), ("max", &max_results.to_string())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Mail API error: {}", response.status()));
        }
        let list: ListResponse = response.json().await?;
        Ok(list.ids)
    }

    pub async fn get_message(&self, id: &str) -> Result<MailMessage> {
        let response = self
            .auth(self.client.get(format!("{}/messages/{}", self.base_url, id)))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Mail API error fetching {}: {}", id, response.status()));
        }
        Ok(response.json().await?)
    }

    /// Find or create a label, returning its id
    pub async fn ensure_label(&self, name: &str) -> Result<String> {
        let response = self
            .auth(self.client.post(format!("{}/labels", self.base_url)))
            .json(&serde_json::json!({"name": name}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Mail API error creating label: {}", response.status()));
        }
        let label: LabelResponse = response.json().await?;
        Ok(label.id)
    }

    /// Add a label to a message (the processed marker)
    pub async fn add_label(&self, message_id: &str, label_id: &str) -> Result<()> {
        let response = self
            .auth(
                self.client
                    .post(format!("{}/messages/{}/labels", self.base_url, message_id)),
            )
            .json(&serde_json::json!({"label_id": label_id}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Mail API error labeling {}: {}",
                message_id,
                response.status()
            ));
        }
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let response = self
            .auth(self.client.get(format!("{}/profile", self.base_url)))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Mail API error: {}", response.status()));
        }
        Ok(())
    }
}
