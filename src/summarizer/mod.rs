//! Turning a transcript into meeting notes.

pub mod openai;

pub use openai::OpenAISummarizer;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::CallError;
use crate::model::MeetingRecord;

#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce markdown notes for a transcript. Calls with the same transcript
    /// are interchangeable, so a duplicate call wastes work but is harmless.
    async fn summarize(&self, transcript: &str) -> Result<String, CallError>;
}

/// Notes as stored next to the transcript they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeetingNotes {
    pub subject: String,
    pub date: String,
    pub speakers: Vec<String>,
    pub speaker_count: usize,
    /// Hex SHA-256 of the transcript the notes were generated from.
    pub transcript_digest: String,
    pub body: String,
}

impl MeetingNotes {
    pub fn new(record: &MeetingRecord, transcript: &str, body: String) -> Self {
        let speakers = extract_speakers(transcript);
        Self {
            subject: record.subject.clone(),
            date: record.start_time.format("%Y-%m-%d %H:%M UTC").to_string(),
            speaker_count: speakers.len(),
            speakers,
            transcript_digest: transcript_digest(transcript),
            body,
        }
    }

    pub fn render(&self) -> String {
        let speakers = if self.speakers.is_empty() {
            "unknown".to_string()
        } else {
            self.speakers.join(", ")
        };
        format!(
            "# {}\n\n- Date: {}\n- Speakers ({}): {}\n- Transcript: sha256:{}\n\n{}\n",
            self.subject,
            self.date,
            self.speaker_count,
            speakers,
            self.transcript_digest,
            self.body.trim_end()
        )
    }
}

static VOICE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<v\s+([^>]+)>").expect("voice tag regex is valid"));

/// Distinct speakers named in WebVTT voice tags, in order of first appearance.
pub fn extract_speakers(transcript: &str) -> Vec<String> {
    let mut speakers: Vec<String> = Vec::new();
    for captures in VOICE_TAG.captures_iter(transcript) {
        let name = captures[1].trim();
        if !name.is_empty() && !speakers.iter().any(|s| s == name) {
            speakers.push(name.to_string());
        }
    }
    speakers
}

pub fn transcript_digest(transcript: &str) -> String {
    hex::encode(Sha256::digest(transcript.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MeetingDescriptor;
    use chrono::{TimeZone, Utc};

    const VTT: &str = "WEBVTT\n\n00:00:00.000 --> 00:00:02.000\n<v Alice Smith>Morning all.</v>\n\n\
                       00:00:02.000 --> 00:00:04.000\n<v Bob>Hi.</v>\n\n\
                       00:00:04.000 --> 00:00:06.000\n<v Alice Smith>Let's start.</v>\n";

    #[test]
    fn test_extract_speakers_dedupes_in_order() {
        assert_eq!(extract_speakers(VTT), vec!["Alice Smith", "Bob"]);
        assert!(extract_speakers("no tags here").is_empty());
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(transcript_digest(VTT), transcript_digest(VTT));
        assert_ne!(transcript_digest(VTT), transcript_digest("WEBVTT"));
        assert_eq!(transcript_digest("").len(), 64);
    }

    #[test]
    fn test_render_includes_header() {
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 14, 0, 0).unwrap();
        let record = MeetingRecord::discovered(
            &MeetingDescriptor {
                organizer_id: "org".to_string(),
                organizer_email: None,
                upstream_meeting_id: "m".to_string(),
                subject: "Planning".to_string(),
                start_time: start,
                end_time: start,
                join_url: None,
                series_id: None,
                is_recurring_parent: false,
            },
            start,
        );
        let notes = MeetingNotes::new(&record, VTT, "Meeting notes:\n* Kickoff\n".to_string());
        let rendered = notes.render();
        assert!(rendered.starts_with("# Planning\n"));
        assert!(rendered.contains("- Date: 2026-10-19 14:00 UTC"));
        assert!(rendered.contains("- Speakers (2): Alice Smith, Bob"));
        assert!(rendered.contains(&notes.transcript_digest));
        assert!(rendered.ends_with("* Kickoff\n"));
    }
}
