//! Pure transition planning: given a record, the time and the outcome of an
//! external call, compute the successor record. No I/O happens here.

use chrono::{DateTime, Utc};

use super::backoff::Jitter;
use super::summary::TransitionOutcome;
use super::EngineSettings;
use crate::error::CallError;
use crate::model::{LifecycleState, MeetingRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Terminal,
    RecurringParent,
    NotDue,
    /// The meeting has not ended, so no transcript can exist.
    MeetingNotOver,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::RecurringParent => "recurring parent",
            Self::NotDue => "not due",
            Self::MeetingNotOver => "meeting not over",
        }
    }
}

/// The one step a pass may take for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Skip(SkipReason),
    /// `Discovered -> TranscriptPending`, then fetch in the same pass.
    MarkTranscriptPending,
    FetchTranscript,
    /// Claim (`-> SummarizationPending`), summarize, complete.
    Summarize,
}

pub fn plan(record: &MeetingRecord, now: DateTime<Utc>) -> Step {
    if record.lifecycle_state.is_terminal() {
        return Step::Skip(SkipReason::Terminal);
    }
    if record.is_recurring_parent {
        return Step::Skip(SkipReason::RecurringParent);
    }
    if !record.is_due(now) {
        return Step::Skip(SkipReason::NotDue);
    }
    match record.lifecycle_state {
        LifecycleState::Discovered if record.end_time > now => {
            Step::Skip(SkipReason::MeetingNotOver)
        }
        LifecycleState::Discovered => Step::MarkTranscriptPending,
        LifecycleState::TranscriptPending => Step::FetchTranscript,
        LifecycleState::TranscriptFetched | LifecycleState::SummarizationPending => {
            Step::Summarize
        }
        LifecycleState::Completed | LifecycleState::Failed => Step::Skip(SkipReason::Terminal),
    }
}

/// Successor after the transcript was reported not ready.
pub fn on_not_ready(
    record: &MeetingRecord,
    now: DateTime<Utc>,
    settings: &EngineSettings,
) -> MeetingRecord {
    let checks = record.deferral_count.saturating_add(1);
    if checks > settings.max_not_ready_checks {
        return record.fail(
            now,
            &format!("transcript still unavailable after {} checks", record.deferral_count),
        );
    }
    record.defer_not_ready(now, now + settings.not_ready_recheck)
}

/// Successor after an external call failed.
pub fn on_failure(
    record: &MeetingRecord,
    error: &CallError,
    now: DateTime<Utc>,
    settings: &EngineSettings,
    jitter: &dyn Jitter,
) -> MeetingRecord {
    if !error.is_transient() {
        return record.fail(now, &error.to_string());
    }

    let failures = record.failure_count().saturating_add(1);
    if failures > settings.max_attempts {
        return record.fail(
            now,
            &format!("giving up after {} attempts: {}", record.failure_count(), error),
        );
    }
    let delay = settings.backoff.delay_chrono(failures, jitter);
    record.defer_failure(now, now + delay, &error.to_string())
}

/// How a written successor counts in the pass summary.
pub fn classify(before: &MeetingRecord, after: &MeetingRecord) -> TransitionOutcome {
    if after.lifecycle_state == LifecycleState::Failed {
        TransitionOutcome::Failed
    } else if after.lifecycle_state != before.lifecycle_state {
        TransitionOutcome::Transitioned
    } else {
        TransitionOutcome::Deferred
    }
}

/// Forward-only check applied to every write.
pub fn is_legal_write(before: &MeetingRecord, after: &MeetingRecord) -> bool {
    before.lifecycle_state == after.lifecycle_state
        || before.lifecycle_state.can_transition_to(after.lifecycle_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backoff::FixedJitter;
    use crate::model::{ArtifactRef, MeetingDescriptor};
    use chrono::{Duration, TimeZone};

    fn record(end_offset_minutes: i64, now: DateTime<Utc>) -> MeetingRecord {
        let start = now - Duration::hours(2);
        MeetingRecord::discovered(
            &MeetingDescriptor {
                organizer_id: "org".to_string(),
                organizer_email: None,
                upstream_meeting_id: "m".to_string(),
                subject: "Sync".to_string(),
                start_time: start,
                end_time: now + Duration::minutes(end_offset_minutes),
                join_url: None,
                series_id: None,
                is_recurring_parent: false,
            },
            start,
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_future_meeting_is_skipped() {
        let r = record(60, now());
        assert_eq!(plan(&r, now()), Step::Skip(SkipReason::MeetingNotOver));
    }

    #[test]
    fn test_ended_meeting_moves_to_pending() {
        let r = record(-5, now());
        assert_eq!(plan(&r, now()), Step::MarkTranscriptPending);
        let pending = r.mark_transcript_pending(now());
        assert_eq!(plan(&pending, now()), Step::FetchTranscript);
    }

    #[test]
    fn test_recurring_parent_and_terminal_are_skipped() {
        let mut parent = record(-5, now());
        parent.is_recurring_parent = true;
        assert_eq!(plan(&parent, now()), Step::Skip(SkipReason::RecurringParent));

        let failed = record(-5, now()).fail(now(), "x");
        assert_eq!(plan(&failed, now()), Step::Skip(SkipReason::Terminal));
    }

    #[test]
    fn test_not_due_is_skipped() {
        let r = record(-5, now())
            .mark_transcript_pending(now())
            .defer_not_ready(now(), now() + Duration::minutes(15));
        assert_eq!(plan(&r, now()), Step::Skip(SkipReason::NotDue));
        assert_eq!(
            plan(&r, now() + Duration::minutes(15)),
            Step::FetchTranscript
        );
    }

    #[test]
    fn test_fetched_and_claimed_records_summarize() {
        let fetched = record(-5, now())
            .mark_transcript_pending(now())
            .record_transcript(ArtifactRef::new("t.vtt"), now());
        assert_eq!(plan(&fetched, now()), Step::Summarize);

        let claimed = fetched.claim_summarization(now(), Duration::minutes(10));
        assert_eq!(plan(&claimed, now()), Step::Skip(SkipReason::NotDue));
        assert_eq!(plan(&claimed, now() + Duration::minutes(10)), Step::Summarize);
    }

    #[test]
    fn test_not_ready_defers_then_fails_past_ceiling() {
        let settings = EngineSettings {
            max_not_ready_checks: 2,
            ..EngineSettings::default()
        };
        let mut r = record(-5, now()).mark_transcript_pending(now());
        for _ in 0..2 {
            r = on_not_ready(&r, now(), &settings);
            assert_eq!(r.lifecycle_state, LifecycleState::TranscriptPending);
        }
        assert_eq!(r.deferral_count, 2);
        assert_eq!(r.failure_count(), 0);

        let failed = on_not_ready(&r, now(), &settings);
        assert_eq!(failed.lifecycle_state, LifecycleState::Failed);
        assert!(failed.last_error.unwrap().contains("2 checks"));
    }

    #[test]
    fn test_transient_failure_backs_off() {
        let settings = EngineSettings::default();
        let r = record(-5, now()).mark_transcript_pending(now());
        let next = on_failure(
            &r,
            &CallError::transient("HTTP 429"),
            now(),
            &settings,
            &FixedJitter::none(),
        );
        assert_eq!(next.lifecycle_state, LifecycleState::TranscriptPending);
        assert_eq!(next.attempt_count, 1);
        // The first retry already waits backoff(1).
        assert_eq!(
            next.next_attempt_not_before,
            Some(now() + Duration::from_std(settings.backoff.base_delay * 2).unwrap())
        );
        let again = on_failure(
            &next,
            &CallError::transient("HTTP 429"),
            now(),
            &settings,
            &FixedJitter::none(),
        );
        assert_eq!(
            again.next_attempt_not_before,
            Some(now() + Duration::from_std(settings.backoff.base_delay * 4).unwrap())
        );
        assert_eq!(classify(&r, &next), TransitionOutcome::Deferred);
    }

    #[test]
    fn test_transient_failures_exhaust_budget() {
        let settings = EngineSettings {
            max_attempts: 3,
            ..EngineSettings::default()
        };
        let err = CallError::transient("HTTP 503");
        let mut r = record(-5, now()).mark_transcript_pending(now());
        for _ in 0..3 {
            r = on_failure(&r, &err, now(), &settings, &FixedJitter::none());
            assert_eq!(r.lifecycle_state, LifecycleState::TranscriptPending);
        }
        let failed = on_failure(&r, &err, now(), &settings, &FixedJitter::none());
        assert_eq!(failed.lifecycle_state, LifecycleState::Failed);
    }

    #[test]
    fn test_deferrals_do_not_consume_failure_budget() {
        let settings = EngineSettings {
            max_attempts: 1,
            ..EngineSettings::default()
        };
        let mut r = record(-5, now()).mark_transcript_pending(now());
        for _ in 0..5 {
            r = on_not_ready(&r, now(), &settings);
        }
        let next = on_failure(
            &r,
            &CallError::transient("timeout"),
            now(),
            &settings,
            &FixedJitter::none(),
        );
        assert_eq!(next.lifecycle_state, LifecycleState::TranscriptPending);
        assert_eq!(next.attempt_count, 6);
    }

    #[test]
    fn test_permanent_failure_fails_immediately() {
        let r = record(-5, now()).mark_transcript_pending(now());
        let next = on_failure(
            &r,
            &CallError::permanent("HTTP 404: not found"),
            now(),
            &EngineSettings::default(),
            &FixedJitter::none(),
        );
        assert_eq!(next.lifecycle_state, LifecycleState::Failed);
        assert_eq!(classify(&r, &next), TransitionOutcome::Failed);
        assert!(next.last_error.unwrap().contains("not found"));
    }

    #[test]
    fn test_backward_writes_are_illegal() {
        let fetched = record(-5, now())
            .mark_transcript_pending(now())
            .record_transcript(ArtifactRef::new("t.vtt"), now());
        let mut regressed = fetched.clone();
        regressed.lifecycle_state = LifecycleState::TranscriptPending;
        assert!(!is_legal_write(&fetched, &regressed));
        assert!(is_legal_write(&fetched, &fetched.fail(now(), "x")));
    }
}
