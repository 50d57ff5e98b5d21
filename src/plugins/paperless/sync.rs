// src/plugins/paperless/sync.rs
// Idempotent document sync pipeline

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::plugins::{PluginContext, SyncReport};
use crate::rag::chunker::MIN_CONTENT_CHARS;
use crate::rag::{ChannelExtras, ContentType, DocumentSource, RagDocument};
use crate::utils::text::strip_unicode_control;

use super::client::{PaperlessClient, PaperlessDocument};

/// Tag applied to documents after indexing
pub const DEFAULT_PROCESSED_TAG: &str = "rag-indexed";

fn document_to_rag(doc: &PaperlessDocument) -> RagDocument {
    let correspondent = doc.correspondent_name.clone().unwrap_or_default();
    RagDocument {
        source: DocumentSource::Paperless,
        source_id: format!("paperless:{}", doc.id),
        content_type: ContentType::Document,
        chat_name: doc.title.clone(),
        sender: correspondent.clone(),
        timestamp: doc.created,
        is_group: false,
        text: strip_unicode_control(&doc.content),
        embedding_header: Some(format!("Document: {}", doc.title)),
        extras: ChannelExtras::Paperless {
            document_id: doc.id,
            title: doc.title.clone(),
            correspondent: doc.correspondent_name.clone(),
            tags: Vec::new(),
        },
    }
}

/// Run one document sync pass over the tag-excluded candidate set
pub async fn sync_documents(
    ctx: &PluginContext,
    client: &PaperlessClient,
    max_items: usize,
    mut force: bool,
    is_syncing: &std::sync::atomic::AtomicBool,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

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

    let tag_id = match client.ensure_tag(DEFAULT_PROCESSED_TAG).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Could not ensure processed tag: {}", e);
            None
        }
    };

    let exclude = if force { None } else { tag_id };
    let ids = client.list_document_ids(exclude, max_items).await?;
    info!("Document sync: {} candidates (force={})", ids.len(), force);

    for doc_id in ids {
        if !is_syncing.load(std::sync::atomic::Ordering::Relaxed) {
            info!("Document sync cancelled");
            break;
        }

        let source_id = format!("paperless:{}", doc_id);

        if !force && ctx.rag.vector_store().point_exists(&source_id).await {
            report.skipped += 1;
            if let Some(tag) = tag_id {
                if client.add_tag(doc_id, tag).await.is_ok() {
                    report.marked_processed += 1;
                }
            }
            continue;
        }

        let doc = match client.get_document(doc_id).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to fetch document {}: {}", doc_id, e);
                report.errors += 1;
                continue;
            }
        };

        if doc.content.chars().count() < MIN_CONTENT_CHARS {
            debug!("Document {} below content threshold, skipping", doc_id);
            report.skipped += 1;
            if let Some(tag) = tag_id {
                if client.add_tag(doc_id, tag).await.is_ok() {
                    report.marked_processed += 1;
                }
            }
            continue;
        }

        let rag_doc = document_to_rag(&doc);
        let ingested = if force {
            ctx.rag.add_document_unchecked(&rag_doc).await
        } else {
            ctx.rag.add_document(&rag_doc).await
        };

        match ingested {
            Ok(outcome) if !outcome.skipped => {
                report.synced += 1;
                link_correspondent(ctx, &doc, &rag_doc.source_id).await;
            }
            Ok(_) => report.skipped += 1,
            Err(e) => {
                warn!("Failed to index document {}: {}", doc_id, e);
                report.errors += 1;
                continue;
            }
        }

        if let Some(tag) = tag_id {
            match client.add_tag(doc_id, tag).await {
                Ok(()) => report.marked_processed += 1,
                Err(e) => warn!("Failed to tag document {}: {}", doc_id, e),
            }
        }
    }

    info!(
        "Document sync complete: {} synced, {} skipped, {} errors",
        report.synced, report.skipped, report.errors
    );
    Ok(report)
}

/// Link the document's correspondent as its owner in the entity graph
async fn link_correspondent(ctx: &PluginContext, doc: &PaperlessDocument, source_id: &str) {
    let Some(name) = doc.correspondent_name.as_deref().filter(|n| !n.is_empty()) else {
        return;
    };

    match ctx
        .entity
        .get_or_create_person(name, None, None, None, false)
        .await
    {
        Ok(person_id) => {
            if let Err(e) = ctx
                .entity
                .link_person_asset(person_id, "document", source_id, "owner", 0.9)
                .await
            {
                warn!("Failed to link correspondent: {}", e);
            }
        }
        Err(e) => warn!("Failed to resolve correspondent {}: {}", name, e),
    }
}
