//! Subscription record persistence, same optimistic scheme as meetings.

use rusqlite::{params, Connection, OptionalExtension};

use super::schemas::{fmt_opt_ts, fmt_ts, subscription_from_row, SUBSCRIPTION_COLUMNS};
use crate::model::SubscriptionRecord;

pub struct SubscriptionRepository;

impl SubscriptionRepository {
    pub fn insert_if_absent(
        conn: &Connection,
        record: &SubscriptionRecord,
    ) -> rusqlite::Result<bool> {
        let inserted = conn.execute(
            "INSERT INTO subscriptions (resource_scope, upstream_ref, expires_at, \
             renewal_lead_seconds, state, attempt_count, next_attempt_not_before, last_error, \
             created_at, updated_at, version) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(resource_scope) DO NOTHING",
            params![
                record.resource_scope,
                record.upstream_ref,
                fmt_ts(record.expires_at),
                record.renewal_lead_seconds,
                record.state.as_str(),
                record.attempt_count,
                fmt_opt_ts(record.next_attempt_not_before),
                record.last_error,
                fmt_ts(record.created_at),
                fmt_ts(record.updated_at),
                record.version,
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn compare_and_swap(
        conn: &Connection,
        resource_scope: &str,
        expected_version: i64,
        record: &SubscriptionRecord,
    ) -> rusqlite::Result<Option<i64>> {
        let updated = conn.execute(
            "UPDATE subscriptions SET upstream_ref = ?1, expires_at = ?2, \
             renewal_lead_seconds = ?3, state = ?4, attempt_count = ?5, \
             next_attempt_not_before = ?6, last_error = ?7, updated_at = ?8, \
             version = version + 1 \
             WHERE resource_scope = ?9 AND version = ?10",
            params![
                record.upstream_ref,
                fmt_ts(record.expires_at),
                record.renewal_lead_seconds,
                record.state.as_str(),
                record.attempt_count,
                fmt_opt_ts(record.next_attempt_not_before),
                record.last_error,
                fmt_ts(record.updated_at),
                resource_scope,
                expected_version,
            ],
        )?;

        if updated == 1 {
            Ok(Some(expected_version + 1))
        } else {
            Ok(None)
        }
    }

    pub fn get(conn: &Connection, resource_scope: &str) -> rusqlite::Result<Option<SubscriptionRecord>> {
        conn.query_row(
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE resource_scope = ?1"),
            params![resource_scope],
            subscription_from_row,
        )
        .optional()
    }

    pub fn list(conn: &Connection) -> rusqlite::Result<Vec<SubscriptionRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY expires_at ASC"
        ))?;
        let rows = stmt.query_map([], subscription_from_row)?;
        rows.collect()
    }
}
