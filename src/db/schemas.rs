//! Row <-> record mapping for the SQLite tables.
//!
//! Timestamps are stored as RFC 3339 UTC text with millisecond precision so
//! that string comparison in SQL matches chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Row;

use crate::model::{
    ArtifactRef, LifecycleState, MeetingId, MeetingOutcome, MeetingRecord, SubscriptionRecord,
    SubscriptionState,
};

pub const MEETING_COLUMNS: &str = "id, organizer_id, organizer_email, upstream_meeting_id, subject, \
     start_time, end_time, join_url, series_id, is_recurring_parent, transcript_ref, notes_ref, \
     lifecycle_state, meeting_outcome, attempt_count, deferral_count, next_attempt_not_before, \
     last_error, created_at, updated_at, version";

pub const SUBSCRIPTION_COLUMNS: &str = "resource_scope, upstream_ref, expires_at, \
     renewal_lead_seconds, state, attempt_count, next_attempt_not_before, last_error, \
     created_at, updated_at, version";

pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn fmt_opt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(fmt_ts)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{raw}': {e}")))
}

fn opt_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| conversion_error(idx, format!("bad timestamp '{raw}': {e}"))),
        None => Ok(None),
    }
}

pub fn meeting_from_row(row: &Row<'_>) -> rusqlite::Result<MeetingRecord> {
    let state: String = row.get(12)?;
    let outcome: String = row.get(13)?;
    Ok(MeetingRecord {
        id: MeetingId::from_raw(row.get::<_, String>(0)?),
        organizer_id: row.get(1)?,
        organizer_email: row.get(2)?,
        upstream_meeting_id: row.get(3)?,
        subject: row.get(4)?,
        start_time: ts_at(row, 5)?,
        end_time: ts_at(row, 6)?,
        join_url: row.get(7)?,
        series_id: row.get(8)?,
        is_recurring_parent: row.get(9)?,
        transcript_ref: row.get::<_, Option<String>>(10)?.map(ArtifactRef::new),
        notes_ref: row.get::<_, Option<String>>(11)?.map(ArtifactRef::new),
        lifecycle_state: LifecycleState::parse(&state)
            .map_err(|e| conversion_error(12, e.to_string()))?,
        meeting_outcome: MeetingOutcome::parse(&outcome)
            .map_err(|e| conversion_error(13, e.to_string()))?,
        attempt_count: row.get(14)?,
        deferral_count: row.get(15)?,
        next_attempt_not_before: opt_ts_at(row, 16)?,
        last_error: row.get(17)?,
        created_at: ts_at(row, 18)?,
        updated_at: ts_at(row, 19)?,
        version: row.get(20)?,
    })
}

pub fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<SubscriptionRecord> {
    let state: String = row.get(4)?;
    Ok(SubscriptionRecord {
        resource_scope: row.get(0)?,
        upstream_ref: row.get(1)?,
        expires_at: ts_at(row, 2)?,
        renewal_lead_seconds: row.get(3)?,
        state: SubscriptionState::parse(&state).map_err(|e| conversion_error(4, e.to_string()))?,
        attempt_count: row.get(5)?,
        next_attempt_not_before: opt_ts_at(row, 6)?,
        last_error: row.get(7)?,
        created_at: ts_at(row, 8)?,
        updated_at: ts_at(row, 9)?,
        version: row.get(10)?,
    })
}
