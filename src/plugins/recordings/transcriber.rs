// src/plugins/recordings/transcriber.rs
// Transcription service contract

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;

/// One diarized segment of a transcript
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptSegment {
    #[serde(default)]
    pub speaker: Option<String>,
    pub text: String,
    #[serde(default)]
    pub start: f64,
}

/// Full transcription result
#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

/// Transcription backend contract. Model loading and audio decoding live
/// behind this boundary.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, path: &Path) -> Result<Transcription>;
}

/// Client for a local transcription service (whisper-style HTTP server
/// that reads the file from a shared filesystem path)
pub struct HttpTranscriber {
    client: Client,
    base_url: String,
}

impl HttpTranscriber {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Transcriber error: {}", response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, path: &Path) -> Result<Transcription> {
        let response = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .json(&serde_json::json!({"path": path.to_string_lossy()}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Transcriber error {}: {}", status, body));
        }

        Ok(response.json().await?)
    }
}

/// Render a transcript with diarization-aware speaker labels for
/// embedding. Falls back to the raw text when no segments exist.
pub fn render_transcript(transcription: &Transcription, participants: &[String]) -> String {
    if transcription.segments.is_empty() {
        return transcription.text.clone();
    }

    transcription
        .segments
        .iter()
        .map(|seg| {
            let speaker = seg
                .speaker
                .as_deref()
                .map(|s| resolve_speaker_label(s, participants))
                .unwrap_or_else(|| "Speaker".to_string());
            format!("{}: {}", speaker, seg.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Map diarization labels (SPEAKER_00, SPEAKER_01) onto known
/// participant names where possible
fn resolve_speaker_label(label: &str, participants: &[String]) -> String {
    if let Some(index) = label.strip_prefix("SPEAKER_") {
        if let Ok(i) = index.parse::<usize>() {
            if let Some(name) = participants.get(i) {
                return name.clone();
            }
        }
    }
    label.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_speaker_labels_from_participants() {
        let transcription = Transcription {
            text: "hello there".to_string(),
            language: Some("en".to_string()),
            duration_secs: Some(4.2),
            segments: vec![
                TranscriptSegment {
                    speaker: Some("SPEAKER_00".to_string()),
                    text: "hello".to_string(),
                    start: 0.0,
                },
                TranscriptSegment {
                    speaker: Some("SPEAKER_01".to_string()),
                    text: "there".to_string(),
                    start: 2.0,
                },
            ],
        };
        let rendered = render_transcript(
            &transcription,
            &["Me".to_string(), "Dana".to_string()],
        );
        assert_eq!(rendered, "Me: hello\nDana: there");
    }

    #[test]
    fn falls_back_to_raw_text_without_segments() {
        let transcription = Transcription {
            text: "raw text".to_string(),
            language: None,
            duration_secs: None,
            segments: vec![],
        };
        assert_eq!(render_transcript(&transcription, &[]), "raw text");
    }
}
