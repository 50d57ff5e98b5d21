// src/plugins/recordings/sync.rs
// Scan, transcribe and approve call recordings

use anyhow::{anyhow, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::plugins::PluginContext;
use crate::rag::{ChannelExtras, ContentType, DocumentSource, RagDocument};

use super::db::RecordingStore;
use super::scanner;
use super::transcriber::{render_transcript, Transcriber};

/// Transcribing rows with no progress for this long get reset to pending
pub const STALE_TRANSCRIBING_MINUTES: i64 = 30;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub new_files: usize,
    pub stale_reset: u64,
}

/// Scan the recordings directory and register unseen files as pending.
/// Re-running without new files is a no-op.
pub async fn scan_and_register(
    store: &RecordingStore,
    dir: &Path,
    stale_minutes: i64,
) -> Result<ScanReport> {
    let mut report = ScanReport {
        stale_reset: store.reset_stale_transcribing(stale_minutes).await?,
        ..Default::default()
    };
    if report.stale_reset > 0 {
        info!("Reset {} stale transcribing job(s)", report.stale_reset);
    }

    let dir = dir.to_path_buf();
    let scanned = tokio::task::spawn_blocking(move || scanner::scan_directory(&dir))
        .await
        .map_err(|e| anyhow!("Scan task failed: {}", e))?;
    report.scanned = scanned.len();

    let known = store.known_hashes().await?;
    for file in scanned {
        if known.contains(&file.content_hash) {
            continue;
        }
        let registered = store
            .upsert_file(
                &file.content_hash,
                &file.path.to_string_lossy(),
                &file.filename,
                file.size_bytes,
                file.modified_at,
                file.contact_name.as_deref(),
                file.phone_number.as_deref(),
            )
            .await?;
        if registered {
            report.new_files += 1;
        }
    }

    if report.new_files > 0 {
        info!("Registered {} new recordings", report.new_files);
    }
    Ok(report)
}

/// Categorized transcription failure reasons surfaced to the UI
fn classify_error(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("lock") {
        "file_locked"
    } else if lower.contains("audio") || lower.contains("format") || lower.contains("decode") {
        "bad_audio"
    } else {
        "generic"
    }
}

/// Cloud-sync clients hold advisory locks on files still uploading; a
/// read attempt then fails with EDEADLK. Copy to a temp path so the
/// transcriber can still read the bytes.
fn prepare_readable_path(file_path: &Path, filename: &str) -> Result<(PathBuf, bool)> {
    match std::fs::File::open(file_path) {
        Ok(_) => Ok((file_path.to_path_buf(), false)),
        Err(e) if e.raw_os_error() == Some(libc::EDEADLK) => {
            let ext = file_path
                .extension()
                .and_then(|x| x.to_str())
                .unwrap_or("m4a");
            let tmp = std::env::temp_dir().join(format!("recording-{}.{}", uuid::Uuid::new_v4(), ext));
            std::fs::copy(file_path, &tmp).map_err(|copy_err| {
                anyhow!("file locked by cloud sync and copy failed: {}", copy_err)
            })?;
            info!("File locked by cloud sync, copied to temp: {}", filename);
            Ok((tmp, true))
        }
        Err(e) => Err(e.into()),
    }
}

/// Transcribe one pending recording, walking the status machine:
/// pending → transcribing → transcribed, or → error with a category.
pub async fn transcribe_file(
    store: &RecordingStore,
    transcriber: &dyn Transcriber,
    content_hash: &str,
) -> Result<()> {
    let file = store
        .get_file(content_hash)
        .await?
        .ok_or_else(|| anyhow!("Unknown recording: {}", content_hash))?;

    if file.status == "transcribing" {
        return Err(anyhow!("Recording is already transcribing"));
    }

    store
        .update_status(content_hash, "transcribing", None, None)
        .await?;

    let file_path = PathBuf::from(&file.file_path);
    let (readable_path, is_temp) = match prepare_readable_path(&file_path, &file.filename) {
        Ok(pair) => pair,
        Err(e) => {
            let message = e.to_string();
            let error_type = classify_error(&message);
            store
                .update_status(content_hash, "error", Some(&message), Some(error_type))
                .await?;
            if error_type == "file_locked" {
                return Err(anyhow!(
                    "File is locked by cloud sync, try again later: {}",
                    file.filename
                ));
            }
            return Err(e);
        }
    };

    store.update_progress(content_hash, "transcribing audio").await?;

    let result = transcriber.transcribe(&readable_path).await;

    if is_temp {
        let _ = std::fs::remove_file(&readable_path);
    }

    match result {
        Ok(transcription) => {
            store.update_progress(content_hash, "storing transcript").await?;
            // Store the diarized rendering so approval works on
            // speaker-labeled text
            let participants = participants_of(&file);
            let rendered = render_transcript(&transcription, &participants);
            store
                .update_transcription(
                    content_hash,
                    &rendered,
                    transcription.language.as_deref(),
                    transcription.duration_secs,
                )
                .await?;
            Ok(())
        }
        Err(e) => {
            let message = e.to_string();
            let error_type = classify_error(&message);
            store
                .update_status(content_hash, "error", Some(&message), Some(error_type))
                .await?;
            Err(e)
        }
    }
}

fn participants_of(file: &super::db::RecordingFile) -> Vec<String> {
    let mut participants = vec!["Me".to_string()];
    if let Some(name) = file.contact_name.as_deref().filter(|n| !n.is_empty()) {
        participants.push(name.to_string());
    }
    participants
}

/// Approve a transcribed recording: resolve participants against the
/// entity store, ingest the transcript, link the asset graph and flip
/// the status.
pub async fn approve_file(
    ctx: &PluginContext,
    store: &RecordingStore,
    content_hash: &str,
    force: bool,
) -> Result<serde_json::Value> {
    let file = store
        .get_file(content_hash)
        .await?
        .ok_or_else(|| anyhow!("Unknown recording: {}", content_hash))?;

    if file.status != "transcribed" && !(force && file.status == "approved") {
        return Err(anyhow!(
            "Recording is not ready for approval (status: {})",
            file.status
        ));
    }

    let transcript = file
        .transcript
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| anyhow!("Recording has no transcript"))?;

    let participants = resolve_participants(ctx, &file).await;
    let source_id = format!("call:{}", file.content_hash);

    let chat_name = file
        .contact_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| file.filename.clone());

    let doc = RagDocument {
        source: DocumentSource::CallRecording,
        source_id: source_id.clone(),
        content_type: ContentType::Transcript,
        chat_name: chat_name.clone(),
        sender: participants.get(1).cloned().unwrap_or_else(|| "Me".to_string()),
        timestamp: file.modified_at,
        is_group: false,
        text: transcript,
        embedding_header: Some(format!("Call recording: {}", chat_name)),
        extras: ChannelExtras::CallRecording {
            content_hash: file.content_hash.clone(),
            filename: file.filename.clone(),
            duration_secs: file.duration_secs,
            participants: participants.clone(),
        },
    };

    let outcome = if force {
        ctx.rag.add_document_unchecked(&doc).await?
    } else {
        ctx.rag.add_document(&doc).await?
    };

    // Link participants and the recording file in the asset graph
    for name in &participants {
        if name == "Me" {
            continue;
        }
        let person_id = match file.phone_number.as_deref() {
            Some(phone) => {
                ctx.entity
                    .get_or_create_person(name, None, Some(phone), None, false)
                    .await
            }
            None => ctx.entity.get_or_create_person(name, None, None, None, false).await,
        };
        match person_id {
            Ok(id) => {
                if let Err(e) = ctx
                    .entity
                    .link_person_asset(id, "call_recording", &source_id, "participant", 1.0)
                    .await
                {
                    warn!("Failed to link participant: {}", e);
                }
            }
            Err(e) => warn!("Failed to resolve participant {}: {}", name, e),
        }
    }
    if let Err(e) = ctx
        .entity
        .link_assets(
            &source_id,
            &format!("file:{}", file.content_hash),
            "transcript_of",
            1.0,
            Some("recordings_sync"),
        )
        .await
    {
        warn!("Failed to add transcript edge: {}", e);
    }

    store.set_participants(content_hash, &participants).await?;
    store.mark_approved(content_hash, &source_id).await?;

    info!("Approved recording {} ({} chunks)", content_hash, outcome.added);
    Ok(json!({
        "status": "approved",
        "source_id": source_id,
        "chunks": outcome.added,
        "participants": participants,
    }))
}

/// Resolve participant display names: the stored contact name, refined
/// through the entity store by phone then by name.
async fn resolve_participants(
    ctx: &PluginContext,
    file: &super::db::RecordingFile,
) -> Vec<String> {
    let mut participants = vec!["Me".to_string()];

    let fallback = file.contact_name.clone().filter(|n| !n.is_empty());

    if let Some(phone) = file.phone_number.as_deref() {
        if let Ok(Some(person_id)) = ctx.entity.find_person_by_phone(phone).await {
            if let Ok(Some(person)) = ctx.entity.get_person(person_id).await {
                participants.push(person.display_name);
                return participants;
            }
        }
    }
    if let Some(name) = fallback {
        if let Ok(ids) = ctx.entity.resolve_name(&name).await {
            if let Some(&person_id) = ids.first() {
                if let Ok(Some(person)) = ctx.entity.get_person(person_id).await {
                    participants.push(person.display_name);
                    return participants;
                }
            }
        }
        participants.push(name);
    }

    participants
}

/// Re-ingest approved recordings whose points are missing (collection
/// reset recovery). Returns the re-indexed count.
pub async fn reindex_approved(
    ctx: &PluginContext,
    store: &RecordingStore,
    force: bool,
) -> Result<usize> {
    let approved = store.list_files(Some("approved"), 10_000).await?;
    let mut reindexed = 0usize;

    for file in approved {
        let Some(source_id) = file.source_id.clone() else { continue };
        if !force && ctx.rag.vector_store().point_exists(&source_id).await {
            continue;
        }
        match approve_file(ctx, store, &file.content_hash, true).await {
            Ok(_) => reindexed += 1,
            Err(e) => warn!("Failed to re-index recording {}: {}", file.content_hash, e),
        }
    }

    Ok(reindexed)
}
