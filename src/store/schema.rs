//! SQLite DDL for the task store.

use rusqlite::Connection;

/// Current schema version stamped into `schema_meta`.
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL. Uses `IF NOT EXISTS` throughout so [`apply_schema`] is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Concurrent reads during writes.
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Timestamps are epoch milliseconds (UTC).
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id              TEXT PRIMARY KEY,
    task_type       TEXT NOT NULL,
    parameters      TEXT NOT NULL DEFAULT '{}',   -- JSON object of strings
    scheduled_at    INTEGER NOT NULL,
    anchor_at       INTEGER NOT NULL,
    priority        INTEGER NOT NULL DEFAULT 0,
    recurrence      TEXT NOT NULL,                -- JSON Recurrence
    status          TEXT NOT NULL,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    max_retries     INTEGER NOT NULL DEFAULT 0,
    last_error      TEXT,
    last_attempt_at INTEGER,
    finished_at     INTEGER,
    sequence        INTEGER NOT NULL,
    created_at      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status      ON scheduled_tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_scheduled   ON scheduled_tasks(scheduled_at);
CREATE INDEX IF NOT EXISTS idx_tasks_finished_at ON scheduled_tasks(finished_at);
"#;

/// Apply the schema and seed the version stamp on a fresh database.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the stamped schema version, if any.
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
