//! Durable blob storage for raw transcripts and generated notes.
//!
//! Paths follow `<collection>/<organizer>/<subject>/<date>/<artifact>`, all
//! derived from immutable record fields, so the same transition always writes
//! the same path and a repeated write is an overwrite.

mod fs_store;

pub use fs_store::FsArtifactStore;

use async_trait::async_trait;

use crate::error::CallError;
use crate::model::{ArtifactRef, MeetingRecord};

pub const TRANSCRIPTS_COLLECTION: &str = "transcripts";
pub const NOTES_COLLECTION: &str = "notes";

/// Longest sanitized path component, in bytes. File names add a short suffix
/// on top and must stay under the common 255-byte limit.
pub const MAX_COMPONENT_BYTES: usize = 100;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` at `path`, replacing whatever was there.
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<ArtifactRef, CallError>;

    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, CallError>;
}

/// Make a string safe to use as one path component.
pub fn sanitize_component(raw: &str, fallback: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = truncate_on_char_boundary(&cleaned, MAX_COMPONENT_BYTES);
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn folder(collection: &str, record: &MeetingRecord) -> (String, String) {
    let organizer = record
        .organizer_email
        .as_deref()
        .unwrap_or(&record.organizer_id);
    let organizer = sanitize_component(organizer, "UnknownOrganizer");
    let subject = sanitize_component(&record.subject, "UnknownSubject");
    let date = record.start_time.format("%Y-%m-%d");
    (format!("{collection}/{organizer}/{subject}/{date}"), subject)
}

pub fn transcript_path(record: &MeetingRecord) -> String {
    let (dir, subject) = folder(TRANSCRIPTS_COLLECTION, record);
    let time = record.start_time.format("%H%M");
    format!("{dir}/{subject}_{time}_transcript.vtt")
}

pub fn notes_path(record: &MeetingRecord) -> String {
    let (dir, subject) = folder(NOTES_COLLECTION, record);
    let time = record.start_time.format("%H%M");
    format!("{dir}/{subject}_{time}_notes.md")
}
