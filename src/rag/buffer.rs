// src/rag/buffer.rs
// Per-chat message buffering for conversation chunks

use chrono_tz::Tz;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::document::{ChannelExtras, ContentType, DocumentSource, RagDocument};
use super::search::format_timestamp;

/// Flush when a chat's buffer reaches this many messages
pub const CHUNK_MAX_MESSAGES: usize = 5;

/// Flush a chat's buffer when no new message arrived for this long
pub const CHUNK_BUFFER_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub sender: String,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug)]
struct ChatBuffer {
    chat_name: String,
    is_group: bool,
    messages: Vec<BufferedMessage>,
    last_push: Instant,
}

/// Buffers the last few messages of each chat and periodically flushes
/// them as a single "conversation chunk" document.
///
/// Isolated messages like "yes" or "me too" embed poorly on their own;
/// a chunk carrying the surrounding exchange gives them retrievable
/// context. Chunk documents carry timestamp 0 so recency queries skip
/// them.
pub struct ConversationBuffer {
    buffers: Mutex<HashMap<String, ChatBuffer>>,
    timezone: Tz,
}

impl ConversationBuffer {
    pub fn new(timezone: Tz) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            timezone,
        }
    }

    /// Buffer a message. Returns a chunk document when the buffer for
    /// this chat just reached the flush threshold.
    pub async fn push(
        &self,
        chat_id: &str,
        chat_name: &str,
        is_group: bool,
        sender: &str,
        message: &str,
        timestamp: i64,
    ) -> Option<RagDocument> {
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers.entry(chat_id.to_string()).or_insert_with(|| ChatBuffer {
            chat_name: chat_name.to_string(),
            is_group,
            messages: Vec::new(),
            last_push: Instant::now(),
        });

        buffer.messages.push(BufferedMessage {
            sender: sender.to_string(),
            message: message.to_string(),
            timestamp,
        });
        buffer.last_push = Instant::now();

        if buffer.messages.len() >= CHUNK_MAX_MESSAGES {
            let buffer = buffers.remove(chat_id)?;
            return self.build_chunk(chat_id, buffer);
        }
        None
    }

    /// Flush all buffers whose TTL expired. Returns the chunk documents
    /// to ingest.
    pub async fn flush_expired(&self) -> Vec<RagDocument> {
        let mut buffers = self.buffers.lock().await;
        let expired: Vec<String> = buffers
            .iter()
            .filter(|(_, b)| b.last_push.elapsed() >= CHUNK_BUFFER_TTL)
            .map(|(chat_id, _)| chat_id.clone())
            .collect();

        let mut chunks = Vec::new();
        for chat_id in expired {
            if let Some(buffer) = buffers.remove(&chat_id) {
                if let Some(doc) = self.build_chunk(&chat_id, buffer) {
                    chunks.push(doc);
                }
            }
        }
        chunks
    }

    /// Build a conversation-chunk document from a buffer. Buffers with
    /// fewer than two messages carry no context and are dropped.
    fn build_chunk(&self, chat_id: &str, buffer: ChatBuffer) -> Option<RagDocument> {
        if buffer.messages.len() < 2 {
            return None;
        }

        let first_ts = buffer.messages.first()?.timestamp;
        let last_ts = buffer.messages.last()?.timestamp;

        let lines: Vec<String> = buffer
            .messages
            .iter()
            .map(|m| {
                format!(
                    "[{}] {}: {}",
                    format_timestamp(m.timestamp, &self.timezone),
                    m.sender,
                    m.message
                )
            })
            .collect();

        Some(RagDocument {
            source: DocumentSource::Whatsapp,
            source_id: format!("chunk:{}:{}:{}", chat_id, first_ts, last_ts),
            content_type: ContentType::ConversationChunk,
            chat_name: buffer.chat_name,
            sender: String::new(),
            // Excluded from recency queries by the timestamp > 0 filter
            timestamp: 0,
            is_group: buffer.is_group,
            text: lines.join("\n"),
            embedding_header: None,
            extras: ChannelExtras::Whatsapp {
                chat_id: chat_id.to_string(),
                has_media: false,
                media_type: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> ConversationBuffer {
        ConversationBuffer::new(chrono_tz::Asia::Jerusalem)
    }

    #[tokio::test]
    async fn flushes_at_message_threshold() {
        let buf = buffer();
        for i in 0..CHUNK_MAX_MESSAGES - 1 {
            let chunk = buf
                .push("chat_A", "Family", true, "Alice", &format!("msg {}", i), 100 + i as i64)
                .await;
            assert!(chunk.is_none());
        }
        let chunk = buf
            .push("chat_A", "Family", true, "Bob", "last", 200)
            .await
            .expect("threshold flush");
        assert_eq!(chunk.timestamp, 0);
        assert_eq!(chunk.content_type, ContentType::ConversationChunk);
        assert!(chunk.source_id.starts_with("chunk:chat_A:"));
        assert!(chunk.text.contains("msg 0"));
        assert!(chunk.text.contains("last"));
    }

    #[tokio::test]
    async fn single_message_buffers_never_flush_as_chunks() {
        let buf = buffer();
        buf.push("chat_B", "Work", false, "Carol", "hello", 100).await;
        // TTL hasn't elapsed, nothing flushes
        assert!(buf.flush_expired().await.is_empty());
    }

    #[tokio::test]
    async fn buffer_resets_after_flush() {
        let buf = buffer();
        for i in 0..CHUNK_MAX_MESSAGES {
            buf.push("chat_C", "Family", true, "Alice", &format!("m{}", i), i as i64)
                .await;
        }
        // Next message starts a fresh buffer
        let chunk = buf.push("chat_C", "Family", true, "Bob", "fresh", 500).await;
        assert!(chunk.is_none());
    }
}
