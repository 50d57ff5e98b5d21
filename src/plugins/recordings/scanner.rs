// src/plugins/recordings/scanner.rs
// Directory scanning and content-addressed file identification

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: [&str; 8] = ["m4a", "mp3", "wav", "ogg", "opus", "amr", "aac", "flac"];

lazy_static! {
    /// "Call recording Dana Levi_972501234567_20240511.m4a" style names
    static ref RECORDING_NAME_RE: Regex =
        Regex::new(r"^Call recording (.+?)_(\d{9,15})_").unwrap();
}

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: i64,
    pub modified_at: i64,
    pub content_hash: String,
    pub contact_name: Option<String>,
    pub phone_number: Option<String>,
}

/// Streaming SHA-256 over the file bytes. The hash is the stable id:
/// renames and moves don't produce duplicates.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Pull a contact name and phone number out of recorder-app filenames
pub fn parse_recording_filename(filename: &str) -> (Option<String>, Option<String>) {
    match RECORDING_NAME_RE.captures(filename) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str().trim().to_string()),
            caps.get(2).map(|m| m.as_str().to_string()),
        ),
        None => (None, None),
    }
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Scan a directory tree for audio files, hashing each. Blocking IO;
/// call from spawn_blocking.
pub fn scan_directory(dir: &Path) -> Vec<ScannedFile> {
    let mut found = Vec::new();

    for entry in WalkDir::new(dir).follow_links(false).into_iter().flatten() {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_audio_file(path) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                debug!("Cannot stat {}: {}", path.display(), e);
                continue;
            }
        };

        let content_hash = match hash_file(path) {
            Ok(h) => h,
            Err(e) => {
                debug!("Cannot hash {}: {}", path.display(), e);
                continue;
            }
        };

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let (contact_name, phone_number) = parse_recording_filename(&filename);

        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        found.push(ScannedFile {
            path: path.to_path_buf(),
            filename,
            size_bytes: metadata.len() as i64,
            modified_at,
            content_hash,
            contact_name,
            phone_number,
        });
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_recorder_filenames() {
        let (name, phone) =
            parse_recording_filename("Call recording Dana Levi_972501234567_20240511.m4a");
        assert_eq!(name.as_deref(), Some("Dana Levi"));
        assert_eq!(phone.as_deref(), Some("972501234567"));

        let (name, phone) = parse_recording_filename("voice-note.m4a");
        assert!(name.is_none());
        assert!(phone.is_none());
    }

    #[test]
    fn hashing_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.mp3");
        let path_b = dir.path().join("b.mp3");
        std::fs::File::create(&path_a)
            .unwrap()
            .write_all(b"same bytes")
            .unwrap();
        std::fs::File::create(&path_b)
            .unwrap()
            .write_all(b"same bytes")
            .unwrap();

        // Identical content hashes the same regardless of name
        assert_eq!(hash_file(&path_a).unwrap(), hash_file(&path_b).unwrap());
    }

    #[test]
    fn scan_finds_only_audio_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note.txt"), b"text").unwrap();
        std::fs::write(dir.path().join("call.m4a"), b"audio bytes").unwrap();

        let found = scan_directory(dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].filename, "call.m4a");
    }
}
