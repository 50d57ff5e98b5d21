// src/plugins/mailbox/sync.rs
// Idempotent email sync pipeline

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::plugins::{PluginContext, SyncReport};
use crate::rag::chunker::MIN_CONTENT_CHARS;
use crate::rag::{ChannelExtras, ContentType, DocumentSource, RagDocument};
use crate::utils::text::sanitize_content;

use super::client::{MailClient, MailMessage};

/// Label applied to messages after indexing; the discovery query
/// excludes it, making re-runs no-ops.
pub const DEFAULT_PROCESSED_LABEL: &str = "rag-indexed";

/// Reply-quote lines kept before the rest of a quote block is dropped
const MAX_QUOTE_LINES: usize = 3;

const SIGNATURE_MARKERS: [&str; 2] = ["--", "__"];

/// Extract a display name from "Name <addr@host>" style headers
fn display_name_of(address: &str) -> String {
    match address.split_once('<') {
        Some((name, _)) if !name.trim().is_empty() => {
            name.trim().trim_matches('"').to_string()
        }
        _ => address.trim().to_string(),
    }
}

fn bare_address(address: &str) -> String {
    match address.split_once('<') {
        Some((_, rest)) => rest.trim_end_matches('>').trim().to_string(),
        None => address.trim().to_string(),
    }
}

/// Build the primary document for an email
fn email_document(msg: &MailMessage, body: String) -> RagDocument {
    let sender = display_name_of(&msg.from_address);
    RagDocument {
        source: DocumentSource::Mailbox,
        source_id: format!("mailbox:{}", msg.id),
        content_type: ContentType::Email,
        chat_name: msg.subject.clone(),
        sender: sender.clone(),
        timestamp: msg.date,
        is_group: false,
        text: body,
        embedding_header: Some(format!("Email: {}\nFrom: {}", msg.subject, sender)),
        extras: ChannelExtras::Mailbox {
            message_id: msg.id.clone(),
            thread_id: msg.thread_id.clone(),
            subject: msg.subject.clone(),
            from_address: bare_address(&msg.from_address),
            to_addresses: msg.to_addresses.clone(),
        },
    }
}

/// Run one email sync pass.
///
/// Discovery excludes already-labeled messages; each candidate is
/// deduped against the vector store, sanitized, chunked, embedded and
/// upserted, then labeled in the source. When the collection is empty,
/// force mode re-indexes everything regardless of labels.
pub async fn sync_emails(
    ctx: &PluginContext,
    client: &MailClient,
    folders: &[String],
    max_items: usize,
    mut force: bool,
    is_syncing: &std::sync::atomic::AtomicBool,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    // Empty collection means a reset happened; source-side markers are
    // stale, so re-index everything
    if !force {
        match ctx.rag.vector_store().total_count().await {
            Ok(0) => {
                info!("Vector collection is empty, enabling force mode for full re-sync");
                force = true;
            }
            Ok(_) => {}
            Err(e) => warn!("Could not check collection count: {}", e),
        }
    }
    report.force = force;

    let label_id = match client.ensure_label(DEFAULT_PROCESSED_LABEL).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Could not ensure processed label: {}", e);
            None
        }
    };

    let exclude = if force { None } else { Some(DEFAULT_PROCESSED_LABEL) };
    let ids = client.list_message_ids(folders, exclude, max_items).await?;
    info!("Email sync: {} candidate messages (force={})", ids.len(), force);

    for msg_id in ids {
        // Cooperative cancellation between items
        if !is_syncing.load(std::sync::atomic::Ordering::Relaxed) {
            info!("Email sync cancelled");
            break;
        }

        let source_id = format!("mailbox:{}", msg_id);

        // Dedup hit: not an error, but still mark processed upstream so
        // discovery stops returning it
        if !force && ctx.rag.vector_store().point_exists(&source_id).await {
            report.skipped += 1;
            if let Some(ref label) = label_id {
                if client.add_label(&msg_id, label).await.is_ok() {
                    report.marked_processed += 1;
                }
            }
            continue;
        }

        let msg = match client.get_message(&msg_id).await {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to fetch message {}: {}", msg_id, e);
                report.errors += 1;
                continue;
            }
        };

        let body = sanitize_content(&msg.body, &SIGNATURE_MARKERS, MAX_QUOTE_LINES);
        if body.chars().count() < MIN_CONTENT_CHARS {
            debug!("Message {} below content threshold, skipping", msg_id);
            report.skipped += 1;
            if let Some(ref label) = label_id {
                if client.add_label(&msg_id, label).await.is_ok() {
                    report.marked_processed += 1;
                }
            }
            continue;
        }

        let doc = email_document(&msg, body);
        let ingested = if force {
            ctx.rag.add_document_unchecked(&doc).await
        } else {
            ctx.rag.add_document(&doc).await
        };

        match ingested {
            Ok(outcome) if !outcome.skipped => {
                report.synced += 1;
                link_email_entities(ctx, &msg, &doc.source_id).await;
                report.attachments += sync_attachments(ctx, &msg, &doc.source_id).await;
            }
            Ok(_) => report.skipped += 1,
            Err(e) => {
                warn!("Failed to index message {}: {}", msg_id, e);
                report.errors += 1;
                continue;
            }
        }

        // The idempotency anchor: label in the source
        if let Some(ref label) = label_id {
            match client.add_label(&msg_id, label).await {
                Ok(()) => report.marked_processed += 1,
                Err(e) => warn!("Failed to label message {}: {}", msg_id, e),
            }
        }
    }

    info!(
        "Email sync complete: {} synced, {} skipped, {} errors, {} attachments",
        report.synced, report.skipped, report.errors, report.attachments
    );
    Ok(report)
}

/// Resolve the sender against the entity store and link the message
/// asset plus its thread edge.
async fn link_email_entities(ctx: &PluginContext, msg: &MailMessage, source_id: &str) {
    let name = display_name_of(&msg.from_address);
    let email = bare_address(&msg.from_address);
    if name.is_empty() && email.is_empty() {
        return;
    }

    let person_name = if name.is_empty() { email.clone() } else { name };
    match ctx
        .entity
        .get_or_create_person(&person_name, None, None, Some(&email), false)
        .await
    {
        Ok(person_id) => {
            if let Err(e) = ctx
                .entity
                .link_person_asset(person_id, "gmail", source_id, "sender", 1.0)
                .await
            {
                warn!("Failed to link email sender: {}", e);
            }
        }
        Err(e) => warn!("Failed to resolve email sender {}: {}", person_name, e),
    }

    if !msg.thread_id.is_empty() {
        let thread_ref = format!("thread:mailbox:{}", msg.thread_id);
        if let Err(e) = ctx
            .entity
            .link_assets(source_id, &thread_ref, "thread_member", 1.0, Some("mail_sync"))
            .await
        {
            warn!("Failed to add mail thread edge: {}", e);
        }
    }
}

/// Index text-bearing attachments as separate documents linked to the
/// email with attachment_of edges.
async fn sync_attachments(ctx: &PluginContext, msg: &MailMessage, base_source_id: &str) -> usize {
    let mut indexed = 0usize;

    for att in &msg.attachments {
        if att.extracted_text.chars().count() < MIN_CONTENT_CHARS {
            continue;
        }

        let att_source_id = format!("{}:att:{}", base_source_id, att.filename);
        let doc = RagDocument {
            source: DocumentSource::Mailbox,
            source_id: att_source_id.clone(),
            content_type: ContentType::Document,
            chat_name: att.filename.clone(),
            sender: display_name_of(&msg.from_address),
            timestamp: msg.date,
            is_group: false,
            text: att.extracted_text.clone(),
            embedding_header: Some(format!(
                "Attachment: {} (from email: {})",
                att.filename, msg.subject
            )),
            extras: ChannelExtras::Mailbox {
                message_id: msg.id.clone(),
                thread_id: msg.thread_id.clone(),
                subject: msg.subject.clone(),
                from_address: bare_address(&msg.from_address),
                to_addresses: msg.to_addresses.clone(),
            },
        };

        match ctx.rag.add_document(&doc).await {
            Ok(outcome) if !outcome.skipped => {
                indexed += 1;
                if let Err(e) = ctx
                    .entity
                    .link_assets(
                        &att_source_id,
                        base_source_id,
                        "attachment_of",
                        1.0,
                        Some("mail_sync"),
                    )
                    .await
                {
                    warn!("Failed to add attachment edge: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to index attachment {}: {}", att.filename, e),
        }
    }

    indexed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_name_and_address() {
        assert_eq!(display_name_of("Dana Levi <dana@example.com>"), "Dana Levi");
        assert_eq!(bare_address("Dana Levi <dana@example.com>"), "dana@example.com");
        assert_eq!(display_name_of("dana@example.com"), "dana@example.com");
        assert_eq!(bare_address("dana@example.com"), "dana@example.com");
    }

    #[test]
    fn email_document_gets_embedding_header() {
        let msg = MailMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            subject: "Quarterly summary".to_string(),
            from_address: "Dana <dana@example.com>".to_string(),
            to_addresses: vec![],
            date: 1000,
            body: String::new(),
            labels: vec![],
            attachments: vec![],
        };
        let doc = email_document(&msg, "body".to_string());
        assert_eq!(doc.source_id, "mailbox:m1");
        let embed = doc.embedding_text("body");
        assert!(embed.starts_with("Email: Quarterly summary"));
        assert!(embed.contains("From: Dana"));
    }
}
