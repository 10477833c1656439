//! SQLite-backed task store.
//!
//! One database file, one `Mutex<Connection>`. Status compare-and-swap is a
//! single conditional `UPDATE`, so it stays atomic even if another process
//! opens the same file.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::schema::{apply_schema, read_schema_version};
use super::TaskStore;
use crate::error::StoreError;
use crate::scheduler::{ScheduledTask, TaskId, TaskStatus};

const SELECT_COLUMNS: &str = "SELECT id, task_type, parameters, scheduled_at, anchor_at, \
     priority, recurrence, status, retry_count, max_retries, last_error, last_attempt_at, \
     finished_at, sequence, created_at FROM scheduled_tasks";

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

/// Task store persisted to a SQLite database file.
pub struct SqliteTaskStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        apply_schema(&conn)?;
        debug!(path = %path.display(), "task store opened");
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stamped schema version.
    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn query(
        &self,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ScheduledTask>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("{SELECT_COLUMNS} {filter} ORDER BY scheduled_at ASC, sequence ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, row_to_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    fn write(&self, task: &ScheduledTask, verb: &str) -> Result<(), StoreError> {
        let parameters =
            serde_json::to_string(&task.parameters).map_err(|e| StoreError::Serde(e.to_string()))?;
        let recurrence =
            serde_json::to_string(&task.recurrence).map_err(|e| StoreError::Serde(e.to_string()))?;

        let conn = self.lock()?;
        let sql = format!(
            "{verb} INTO scheduled_tasks (id, task_type, parameters, scheduled_at, anchor_at, \
             priority, recurrence, status, retry_count, max_retries, last_error, last_attempt_at, \
             finished_at, sequence, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        );
        conn.execute(
            &sql,
            params![
                task.id.to_string(),
                task.task_type,
                parameters,
                task.scheduled_time.timestamp_millis(),
                task.anchor_time.timestamp_millis(),
                task.priority,
                recurrence,
                task.status.as_str(),
                task.retry_count,
                task.max_retries,
                task.last_error,
                task.last_attempt_time.map(|t| t.timestamp_millis()),
                task.finished_at.map(|t| t.timestamp_millis()),
                i64::try_from(task.sequence).unwrap_or(i64::MAX),
                task.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

impl TaskStore for SqliteTaskStore {
    fn insert(&self, task: &ScheduledTask) -> Result<(), StoreError> {
        match self.write(task, "INSERT") {
            Err(StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate(task.id.to_string()))
            }
            other => other,
        }
    }

    fn upsert(&self, task: &ScheduledTask) -> Result<(), StoreError> {
        self.write(task, "INSERT OR REPLACE")
    }

    fn get(&self, id: TaskId) -> Result<Option<ScheduledTask>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![id.to_string()], row_to_task)
            .optional()?)
    }

    fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM scheduled_tasks WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(rows > 0)
    }

    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<ScheduledTask>, StoreError> {
        self.query("WHERE status = ?1", params![status.as_str()])
    }

    fn list_all(&self) -> Result<Vec<ScheduledTask>, StoreError> {
        self.query("", params![])
    }

    fn compare_and_swap_status(
        &self,
        id: TaskId,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE scheduled_tasks SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![new.as_str(), id.to_string(), expected.as_str()],
        )?;
        Ok(rows == 1)
    }

    fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "DELETE FROM scheduled_tasks WHERE status IN {TERMINAL_STATUSES} \
             AND finished_at IS NOT NULL AND finished_at < ?1"
        );
        Ok(conn.execute(&sql, params![cutoff.timestamp_millis()])?)
    }

    fn max_sequence(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let max: Option<i64> =
            conn.query_row("SELECT MAX(sequence) FROM scheduled_tasks", [], |row| {
                row.get(0)
            })?;
        Ok(max.and_then(|m| u64::try_from(m).ok()).unwrap_or(0))
    }
}

fn conversion_error(
    column: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, err.into())
}

fn millis(column: usize, raw: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(raw)
        .ok_or_else(|| conversion_error(column, format!("timestamp {raw} out of range")))
}

fn opt_millis(column: usize, raw: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|r| millis(column, r)).transpose()
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let id_str: String = row.get(0)?;
    let parameters_json: String = row.get(2)?;
    let recurrence_json: String = row.get(6)?;
    let status_str: String = row.get(7)?;
    let sequence: i64 = row.get(13)?;

    Ok(ScheduledTask {
        id: id_str.parse().map_err(|e| conversion_error(0, e))?,
        task_type: row.get(1)?,
        parameters: serde_json::from_str(&parameters_json).map_err(|e| conversion_error(2, e))?,
        scheduled_time: millis(3, row.get(3)?)?,
        anchor_time: millis(4, row.get(4)?)?,
        priority: row.get(5)?,
        recurrence: serde_json::from_str(&recurrence_json).map_err(|e| conversion_error(6, e))?,
        status: TaskStatus::parse(&status_str)
            .ok_or_else(|| conversion_error(7, format!("unknown status '{status_str}'")))?,
        retry_count: row.get(8)?,
        max_retries: row.get(9)?,
        last_error: row.get(10)?,
        last_attempt_time: opt_millis(11, row.get(11)?)?,
        finished_at: opt_millis(12, row.get(12)?)?,
        sequence: u64::try_from(sequence).unwrap_or(0),
        created_at: millis(14, row.get(14)?)?,
    })
}
