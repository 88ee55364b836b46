//! SQLite DDL for the run timeline.

use rusqlite::Connection;

/// Schema version written to `schema_meta` on first open.
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the run timeline database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- One row per ScheduledRun. Rows are updated in place on status transitions.
-- All timestamps are epoch milliseconds (UTC).
CREATE TABLE IF NOT EXISTS scheduled_runs (
    id                    TEXT PRIMARY KEY,
    scheduled_time        INTEGER NOT NULL,
    actual_execution_time INTEGER,
    reason                TEXT NOT NULL,
    topic                 TEXT NOT NULL,
    details               TEXT,
    status                TEXT NOT NULL,
    error_message         TEXT,
    execution_duration_ms INTEGER,
    result_payload        TEXT,
    created_at            INTEGER NOT NULL,
    updated_at            INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_status            ON scheduled_runs(status);
CREATE INDEX IF NOT EXISTS idx_runs_updated_at        ON scheduled_runs(updated_at);
CREATE INDEX IF NOT EXISTS idx_runs_created_at        ON scheduled_runs(created_at);
CREATE INDEX IF NOT EXISTS idx_runs_topic             ON scheduled_runs(topic);
CREATE INDEX IF NOT EXISTS idx_runs_status_updated_at ON scheduled_runs(status, updated_at DESC);
"#;

/// Apply the full schema to an open connection and seed the version row.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the current schema version, `None` when the row is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
