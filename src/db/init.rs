use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub fn open_db(db_path: &Path) -> Result<Connection> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let conn = Connection::open(db_path).context("Failed to open database connection")?;

    // The CLI and the service may hold the file at the same time.
    conn.busy_timeout(Duration::from_secs(5))
        .context("Failed to set busy timeout")?;
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
        .context("Failed to enable WAL journal")?;

    migrate(&conn)?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meetings (
            id TEXT PRIMARY KEY,
            organizer_id TEXT NOT NULL,
            organizer_email TEXT,
            upstream_meeting_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            join_url TEXT,
            series_id TEXT,
            is_recurring_parent INTEGER NOT NULL DEFAULT 0,
            transcript_ref TEXT,
            notes_ref TEXT,
            lifecycle_state TEXT NOT NULL,
            meeting_outcome TEXT NOT NULL DEFAULT 'unknown',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            deferral_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_not_before TEXT,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )
    .context("Failed to create meetings table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meetings_state ON meetings(lifecycle_state)",
        [],
    )
    .context("Failed to create meetings state index")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meetings_start_time ON meetings(start_time DESC)",
        [],
    )
    .context("Failed to create meetings start_time index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscriptions (
            resource_scope TEXT PRIMARY KEY,
            upstream_ref TEXT,
            expires_at TEXT NOT NULL,
            renewal_lead_seconds INTEGER NOT NULL,
            state TEXT NOT NULL DEFAULT 'active',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_not_before TEXT,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )
    .context("Failed to create subscriptions table")?;

    Ok(())
}
