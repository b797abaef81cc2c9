//! Meeting record persistence.
//!
//! Raw SQL with rusqlite, no ORM. Every mutation after insert goes through
//! [`MeetingRepository::compare_and_swap`], which only writes when the stored
//! version still matches the caller's.

use rusqlite::{params, Connection, OptionalExtension};

use super::schemas::{fmt_opt_ts, fmt_ts, meeting_from_row, MEETING_COLUMNS};
use crate::model::{LifecycleState, MeetingId, MeetingRecord};

/// Repository for meeting records.
pub struct MeetingRepository;

impl MeetingRepository {
    /// Insert unless a row with the same id exists. Returns whether a row was created.
    pub fn insert_if_absent(conn: &Connection, record: &MeetingRecord) -> rusqlite::Result<bool> {
        let inserted = conn.execute(
            "INSERT INTO meetings (id, organizer_id, organizer_email, upstream_meeting_id, subject, \
             start_time, end_time, join_url, series_id, is_recurring_parent, transcript_ref, notes_ref, \
             lifecycle_state, meeting_outcome, attempt_count, deferral_count, next_attempt_not_before, \
             last_error, created_at, updated_at, version) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21) \
             ON CONFLICT(id) DO NOTHING",
            params![
                record.id.as_str(),
                record.organizer_id,
                record.organizer_email,
                record.upstream_meeting_id,
                record.subject,
                fmt_ts(record.start_time),
                fmt_ts(record.end_time),
                record.join_url,
                record.series_id,
                record.is_recurring_parent,
                record.transcript_ref.as_ref().map(|r| r.as_str()),
                record.notes_ref.as_ref().map(|r| r.as_str()),
                record.lifecycle_state.as_str(),
                record.meeting_outcome.as_str(),
                record.attempt_count,
                record.deferral_count,
                fmt_opt_ts(record.next_attempt_not_before),
                record.last_error,
                fmt_ts(record.created_at),
                fmt_ts(record.updated_at),
                record.version,
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Write the mutable columns of `record` if the stored version equals
    /// `expected_version`. Returns the new version, or `None` on mismatch.
    pub fn compare_and_swap(
        conn: &Connection,
        id: &MeetingId,
        expected_version: i64,
        record: &MeetingRecord,
    ) -> rusqlite::Result<Option<i64>> {
        let updated = conn.execute(
            "UPDATE meetings SET transcript_ref = ?1, notes_ref = ?2, lifecycle_state = ?3, \
             meeting_outcome = ?4, attempt_count = ?5, deferral_count = ?6, \
             next_attempt_not_before = ?7, last_error = ?8, updated_at = ?9, \
             version = version + 1 \
             WHERE id = ?10 AND version = ?11",
            params![
                record.transcript_ref.as_ref().map(|r| r.as_str()),
                record.notes_ref.as_ref().map(|r| r.as_str()),
                record.lifecycle_state.as_str(),
                record.meeting_outcome.as_str(),
                record.attempt_count,
                record.deferral_count,
                fmt_opt_ts(record.next_attempt_not_before),
                record.last_error,
                fmt_ts(record.updated_at),
                id.as_str(),
                expected_version,
            ],
        )?;

        if updated == 1 {
            Ok(Some(expected_version + 1))
        } else {
            Ok(None)
        }
    }

    /// Get a meeting by ID.
    pub fn get(conn: &Connection, id: &MeetingId) -> rusqlite::Result<Option<MeetingRecord>> {
        conn.query_row(
            &format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = ?1"),
            params![id.as_str()],
            meeting_from_row,
        )
        .optional()
    }

    /// Records the engine may still act on, oldest meetings first.
    pub fn list_actionable(conn: &Connection) -> rusqlite::Result<Vec<MeetingRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEETING_COLUMNS} FROM meetings \
             WHERE lifecycle_state NOT IN (?1, ?2) \
             ORDER BY start_time ASC, id ASC"
        ))?;

        let rows = stmt.query_map(
            params![
                LifecycleState::Completed.as_str(),
                LifecycleState::Failed.as_str()
            ],
            meeting_from_row,
        )?;

        rows.collect()
    }

    /// List meetings, newest first, optionally restricted to one state.
    pub fn list(
        conn: &Connection,
        state: Option<LifecycleState>,
        limit: usize,
    ) -> rusqlite::Result<Vec<MeetingRecord>> {
        let limit = limit as i64;
        match state {
            Some(state) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MEETING_COLUMNS} FROM meetings WHERE lifecycle_state = ?1 \
                     ORDER BY start_time DESC, id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![state.as_str(), limit], meeting_from_row)?;
                rows.collect()
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MEETING_COLUMNS} FROM meetings \
                     ORDER BY start_time DESC, id DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit], meeting_from_row)?;
                rows.collect()
            }
        }
    }

    pub fn count_by_state(conn: &Connection) -> rusqlite::Result<Vec<(String, i64)>> {
        let mut stmt = conn.prepare(
            "SELECT lifecycle_state, COUNT(*) FROM meetings GROUP BY lifecycle_state",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }
}
