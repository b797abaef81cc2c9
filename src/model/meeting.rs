//! Meeting records and the descriptors they are discovered from.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::lifecycle::{LifecycleState, MeetingOutcome};

/// Stable key of a meeting occurrence.
///
/// Derived purely from organizer, upstream meeting id and occurrence start, so
/// rediscovering the same occurrence always lands on the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeetingId(String);

impl MeetingId {
    pub fn derive(organizer_id: &str, upstream_meeting_id: &str, start_time: DateTime<Utc>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(organizer_id.as_bytes());
        hasher.update(b"\n");
        hasher.update(upstream_meeting_id.as_bytes());
        hasher.update(b"\n");
        hasher.update(
            start_time
                .to_rfc3339_opts(SecondsFormat::Secs, true)
                .as_bytes(),
        );
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an id read back from storage or a caller.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MeetingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of a stored artifact, relative to the artifact store root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A meeting occurrence as reported by the upstream platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingDescriptor {
    pub organizer_id: String,
    pub organizer_email: Option<String>,
    pub upstream_meeting_id: String,
    pub subject: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub join_url: Option<String>,
    pub series_id: Option<String>,
    pub is_recurring_parent: bool,
}

impl MeetingDescriptor {
    pub fn id(&self) -> MeetingId {
        MeetingId::derive(&self.organizer_id, &self.upstream_meeting_id, self.start_time)
    }
}

/// Per-occurrence lifecycle record, the unit the engine reconciles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub id: MeetingId,
    pub organizer_id: String,
    pub organizer_email: Option<String>,
    pub upstream_meeting_id: String,
    pub subject: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub join_url: Option<String>,
    pub series_id: Option<String>,
    pub is_recurring_parent: bool,
    pub transcript_ref: Option<ArtifactRef>,
    pub notes_ref: Option<ArtifactRef>,
    pub lifecycle_state: LifecycleState,
    pub meeting_outcome: MeetingOutcome,
    /// Unsuccessful attempts in the current phase, deferrals included.
    pub attempt_count: u32,
    /// How many of `attempt_count` were "transcript not ready yet".
    pub deferral_count: u32,
    pub next_attempt_not_before: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl MeetingRecord {
    /// Fresh `Discovered` record at version 0.
    pub fn discovered(descriptor: &MeetingDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            id: descriptor.id(),
            organizer_id: descriptor.organizer_id.clone(),
            organizer_email: descriptor.organizer_email.clone(),
            upstream_meeting_id: descriptor.upstream_meeting_id.clone(),
            subject: descriptor.subject.clone(),
            start_time: descriptor.start_time,
            end_time: descriptor.end_time,
            join_url: descriptor.join_url.clone(),
            series_id: descriptor.series_id.clone(),
            is_recurring_parent: descriptor.is_recurring_parent,
            transcript_ref: None,
            notes_ref: None,
            lifecycle_state: LifecycleState::Discovered,
            meeting_outcome: MeetingOutcome::Unknown,
            attempt_count: 0,
            deferral_count: 0,
            next_attempt_not_before: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Attempts that failed with a transient error, as opposed to deferrals.
    pub fn failure_count(&self) -> u32 {
        self.attempt_count.saturating_sub(self.deferral_count)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_not_before.map_or(true, |at| at <= now)
    }

    /// Check the reference invariants against the lifecycle state.
    pub fn check_invariants(&self) -> Result<(), String> {
        let state = self.lifecycle_state;
        if state != LifecycleState::Failed
            && state.holds_transcript() != self.transcript_ref.is_some()
        {
            return Err(format!(
                "transcript_ref presence does not match state {} for {}",
                state, self.id
            ));
        }
        if (state == LifecycleState::Completed) != self.notes_ref.is_some() {
            return Err(format!(
                "notes_ref presence does not match state {} for {}",
                state, self.id
            ));
        }
        if self.deferral_count > self.attempt_count {
            return Err(format!("deferral_count exceeds attempt_count for {}", self.id));
        }
        Ok(())
    }

    // The helpers below build the successor record for one transition. They
    // never touch `version`; the store bumps it on a successful swap.

    pub fn mark_transcript_pending(&self, now: DateTime<Utc>) -> Self {
        Self {
            lifecycle_state: LifecycleState::TranscriptPending,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Counters are kept so the fetched record still reports its deferrals.
    pub fn record_transcript(&self, transcript_ref: ArtifactRef, now: DateTime<Utc>) -> Self {
        Self {
            lifecycle_state: LifecycleState::TranscriptFetched,
            transcript_ref: Some(transcript_ref),
            meeting_outcome: MeetingOutcome::Success,
            next_attempt_not_before: None,
            last_error: None,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Counters reset when the summarization phase starts, not on a re-claim
    /// after a failed summarization attempt.
    pub fn claim_summarization(&self, now: DateTime<Utc>, lease: Duration) -> Self {
        let starting = self.lifecycle_state == LifecycleState::TranscriptFetched;
        Self {
            lifecycle_state: LifecycleState::SummarizationPending,
            attempt_count: if starting { 0 } else { self.attempt_count },
            deferral_count: if starting { 0 } else { self.deferral_count },
            next_attempt_not_before: Some(now + lease),
            last_error: None,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn complete(&self, notes_ref: ArtifactRef, now: DateTime<Utc>) -> Self {
        Self {
            lifecycle_state: LifecycleState::Completed,
            notes_ref: Some(notes_ref),
            attempt_count: 0,
            deferral_count: 0,
            next_attempt_not_before: None,
            last_error: None,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn defer_not_ready(&self, now: DateTime<Utc>, next_attempt: DateTime<Utc>) -> Self {
        Self {
            attempt_count: self.attempt_count.saturating_add(1),
            deferral_count: self.deferral_count.saturating_add(1),
            next_attempt_not_before: Some(next_attempt),
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn defer_failure(
        &self,
        now: DateTime<Utc>,
        next_attempt: DateTime<Utc>,
        error: &str,
    ) -> Self {
        Self {
            attempt_count: self.attempt_count.saturating_add(1),
            next_attempt_not_before: Some(next_attempt),
            last_error: Some(error.to_string()),
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn fail(&self, now: DateTime<Utc>, reason: &str) -> Self {
        let meeting_outcome = if self.lifecycle_state.holds_transcript() {
            self.meeting_outcome
        } else {
            MeetingOutcome::Failure
        };
        Self {
            lifecycle_state: LifecycleState::Failed,
            meeting_outcome,
            next_attempt_not_before: None,
            last_error: Some(reason.to_string()),
            updated_at: now,
            ..self.clone()
        }
    }

    /// Replay: back to `TranscriptPending` with a clean slate.
    pub fn rearm(&self, now: DateTime<Utc>) -> Self {
        Self {
            lifecycle_state: LifecycleState::TranscriptPending,
            meeting_outcome: MeetingOutcome::Unknown,
            transcript_ref: None,
            notes_ref: None,
            attempt_count: 0,
            deferral_count: 0,
            next_attempt_not_before: None,
            last_error: None,
            updated_at: now,
            ..self.clone()
        }
    }
}
