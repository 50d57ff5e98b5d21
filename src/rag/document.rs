// src/rag/document.rs
// Unified document type produced by all channels

use qdrant_client::qdrant::{PointStruct, Value as QdrantValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Originating channel of an indexed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Whatsapp,
    Mailbox,
    Paperless,
    CallRecording,
    System,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSource::Whatsapp => "whatsapp",
            DocumentSource::Mailbox => "mailbox",
            DocumentSource::Paperless => "paperless",
            DocumentSource::CallRecording => "call_recording",
            DocumentSource::System => "system",
        }
    }

    pub fn all() -> &'static [DocumentSource] {
        &[
            DocumentSource::Whatsapp,
            DocumentSource::Mailbox,
            DocumentSource::Paperless,
            DocumentSource::CallRecording,
        ]
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DocumentSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "whatsapp" => Ok(DocumentSource::Whatsapp),
            "mailbox" | "gmail" | "email" => Ok(DocumentSource::Mailbox),
            "paperless" => Ok(DocumentSource::Paperless),
            "call_recording" => Ok(DocumentSource::CallRecording),
            "system" => Ok(DocumentSource::System),
            _ => Err(anyhow::anyhow!("Unknown document source: {}", s)),
        }
    }
}

/// Kind of content a point holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Message,
    ConversationChunk,
    Document,
    Email,
    Transcript,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Message => "message",
            ContentType::ConversationChunk => "conversation_chunk",
            ContentType::Document => "document",
            ContentType::Email => "email",
            ContentType::Transcript => "transcript",
        }
    }
}

/// Channel-specific payload fields, typed per channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum ChannelExtras {
    Whatsapp {
        chat_id: String,
        #[serde(default)]
        has_media: bool,
        #[serde(default)]
        media_type: Option<String>,
    },
    Mailbox {
        message_id: String,
        thread_id: String,
        subject: String,
        from_address: String,
        #[serde(default)]
        to_addresses: Vec<String>,
    },
    Paperless {
        document_id: i64,
        title: String,
        #[serde(default)]
        correspondent: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
    },
    CallRecording {
        content_hash: String,
        filename: String,
        #[serde(default)]
        duration_secs: Option<f64>,
        #[serde(default)]
        participants: Vec<String>,
    },
    None,
}

/// A unit of content ready for the vector store.
///
/// Channels produce these; the ingestor chunks, embeds and upserts them.
/// `source_id` is globally unique per logical item and anchors dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagDocument {
    pub source: DocumentSource,
    pub source_id: String,
    pub content_type: ContentType,
    pub chat_name: String,
    pub sender: String,
    pub timestamp: i64,
    pub is_group: bool,
    /// Primary text stored in the payload and chunked for embedding
    pub text: String,
    /// Optional header prefixed to the embedding text only
    /// ("Email: subject\nFrom: sender"), never stored in the payload
    #[serde(default)]
    pub embedding_header: Option<String>,
    pub extras: ChannelExtras,
}

impl RagDocument {
    /// Deterministic point id for a chunk of this document.
    ///
    /// Derived from (source, source_id, chunk_index) via SHA-256 so
    /// re-ingesting the same item always produces the same ids, making
    /// upserts idempotent.
    pub fn point_id(&self, chunk_index: usize) -> String {
        deterministic_point_id(self.source.as_str(), &self.source_id, chunk_index)
    }

    /// Project the document into a Qdrant payload for one chunk
    pub fn payload(
        &self,
        chunk_text: &str,
        chunk_index: usize,
        chunk_total: usize,
    ) -> HashMap<String, QdrantValue> {
        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert("source".to_string(), self.source.as_str().to_string().into());
        payload.insert("source_id".to_string(), self.chunk_source_id(chunk_index, chunk_total).into());
        payload.insert(
            "content_type".to_string(),
            self.content_type.as_str().to_string().into(),
        );
        payload.insert("chat_name".to_string(), self.chat_name.clone().into());
        payload.insert("sender".to_string(), self.sender.clone().into());
        payload.insert("timestamp".to_string(), self.timestamp.into());
        payload.insert("is_group".to_string(), self.is_group.into());
        payload.insert("message".to_string(), chunk_text.to_string().into());

        if chunk_total > 1 {
            payload.insert("chunk_index".to_string(), (chunk_index as i64).into());
            payload.insert("chunk_total".to_string(), (chunk_total as i64).into());
        }

        // Channel-specific fields flatten into the payload
        match &self.extras {
            ChannelExtras::Whatsapp {
                chat_id,
                has_media,
                media_type,
            } => {
                payload.insert("chat_id".to_string(), chat_id.clone().into());
                if *has_media {
                    payload.insert("has_media".to_string(), true.into());
                }
                if let Some(mt) = media_type {
                    payload.insert("media_type".to_string(), mt.clone().into());
                }
            }
            ChannelExtras::Mailbox {
                message_id,
                thread_id,
                subject,
                from_address,
                to_addresses,
            } => {
                payload.insert("message_id".to_string(), message_id.clone().into());
                payload.insert("thread_id".to_string(), thread_id.clone().into());
                payload.insert("subject".to_string(), subject.clone().into());
                payload.insert("from_address".to_string(), from_address.clone().into());
                if !to_addresses.is_empty() {
                    payload.insert("to_addresses".to_string(), to_addresses.join(",").into());
                }
            }
            ChannelExtras::Paperless {
                document_id,
                title,
                correspondent,
                tags,
            } => {
                payload.insert("document_id".to_string(), (*document_id).into());
                payload.insert("title".to_string(), title.clone().into());
                if let Some(c) = correspondent {
                    payload.insert("correspondent".to_string(), c.clone().into());
                }
                if !tags.is_empty() {
                    payload.insert("tags".to_string(), tags.join(",").into());
                }
            }
            ChannelExtras::CallRecording {
                content_hash,
                filename,
                duration_secs,
                participants,
            } => {
                payload.insert("content_hash".to_string(), content_hash.clone().into());
                payload.insert("filename".to_string(), filename.clone().into());
                if let Some(d) = duration_secs {
                    payload.insert("duration_secs".to_string(), (*d).into());
                }
                if !participants.is_empty() {
                    payload.insert("participants".to_string(), participants.join(",").into());
                }
            }
            ChannelExtras::None => {}
        }

        payload
    }

    /// Per-chunk source id: `"<base>:chunk:<i>"` for multi-chunk items,
    /// the base id for single-chunk items
    pub fn chunk_source_id(&self, chunk_index: usize, chunk_total: usize) -> String {
        if chunk_total > 1 {
            format!("{}:chunk:{}", self.source_id, chunk_index)
        } else {
            self.source_id.clone()
        }
    }

    /// Text sent to the embedding provider for a chunk (header + chunk)
    pub fn embedding_text(&self, chunk_text: &str) -> String {
        match &self.embedding_header {
            Some(header) => format!("{}\n\n{}", header, chunk_text),
            None => chunk_text.to_string(),
        }
    }

    /// Build the point struct for one embedded chunk
    pub fn to_point(
        &self,
        chunk_text: &str,
        chunk_index: usize,
        chunk_total: usize,
        vector: Vec<f32>,
    ) -> PointStruct {
        PointStruct::new(
            self.point_id(chunk_index),
            vector,
            self.payload(chunk_text, chunk_index, chunk_total),
        )
    }
}

/// Deterministic uuid-formatted point id from (source, source_id, chunk)
pub fn deterministic_point_id(source: &str, source_id: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b":");
    hasher.update(source_id.as_bytes());
    hasher.update(b":");
    hasher.update(chunk_index.to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> RagDocument {
        RagDocument {
            source: DocumentSource::Whatsapp,
            source_id: "chat_A:1000".to_string(),
            content_type: ContentType::Message,
            chat_name: "Family".to_string(),
            sender: "Alice".to_string(),
            timestamp: 1000,
            is_group: true,
            text: "We meet at Bistro at 7pm on Friday.".to_string(),
            embedding_header: None,
            extras: ChannelExtras::Whatsapp {
                chat_id: "chat_A".to_string(),
                has_media: false,
                media_type: None,
            },
        }
    }

    #[test]
    fn point_ids_are_deterministic() {
        let d = doc();
        assert_eq!(d.point_id(0), d.point_id(0));
        assert_ne!(d.point_id(0), d.point_id(1));
        assert_ne!(
            deterministic_point_id("whatsapp", "chat_A:1000", 0),
            deterministic_point_id("mailbox", "chat_A:1000", 0),
        );
    }

    #[test]
    fn single_chunk_keeps_base_source_id() {
        let d = doc();
        assert_eq!(d.chunk_source_id(0, 1), "chat_A:1000");
        assert_eq!(d.chunk_source_id(1, 3), "chat_A:1000:chunk:1");
    }

    #[test]
    fn payload_carries_required_fields() {
        let d = doc();
        let payload = d.payload(&d.text, 0, 1);
        assert!(payload.contains_key("source"));
        assert!(payload.contains_key("source_id"));
        assert!(payload.contains_key("content_type"));
        assert!(payload.contains_key("timestamp"));
        assert!(payload.contains_key("message"));
        assert!(payload.contains_key("chat_id"));
        assert!(!payload.contains_key("chunk_index"));
    }

    #[test]
    fn embedding_header_prefixes_only_embedding_text() {
        let mut d = doc();
        d.embedding_header = Some("Email: hello\nFrom: bob".to_string());
        let text = d.embedding_text("body");
        assert!(text.starts_with("Email: hello"));
        // The payload message field keeps the raw chunk
        let payload = d.payload("body", 0, 1);
        let message = payload.get("message").and_then(|v| v.as_str()).unwrap();
        assert_eq!(message, "body");
    }
}
