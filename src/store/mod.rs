//! Durable task persistence.
//!
//! [`TaskStore`] is plain keyed storage: no business logic beyond the
//! compare-and-swap on `status` that makes fire/cancel races safe.

pub mod memory;
mod schema;
pub mod sqlite;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::scheduler::{ScheduledTask, TaskId, TaskStatus};

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// Keyed storage for task records.
pub trait TaskStore: Send + Sync {
    /// Persist a new record. Fails if the id already exists.
    fn insert(&self, task: &ScheduledTask) -> Result<(), StoreError>;

    /// Insert or fully replace a record.
    fn upsert(&self, task: &ScheduledTask) -> Result<(), StoreError>;

    /// Fetch one record.
    fn get(&self, id: TaskId) -> Result<Option<ScheduledTask>, StoreError>;

    /// Remove a record. Returns `false` if it did not exist.
    fn delete(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Records in `status`, ordered by due time then insertion order.
    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<ScheduledTask>, StoreError>;

    /// Every record, ordered by due time then insertion order.
    fn list_all(&self) -> Result<Vec<ScheduledTask>, StoreError>;

    /// Atomically set `status` to `new` if it currently equals `expected`.
    ///
    /// Returns `false` (and changes nothing) when the record is missing or
    /// in another status.
    fn compare_and_swap_status(
        &self,
        id: TaskId,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool, StoreError>;

    /// Delete terminal records whose `finished_at` is before `cutoff`.
    fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Highest insertion sequence in the store (0 when empty).
    fn max_sequence(&self) -> Result<u64, StoreError> {
        Ok(self
            .list_all()?
            .iter()
            .map(|t| t.sequence)
            .max()
            .unwrap_or(0))
    }
}

/// Open the backend selected in `config`.
///
/// # Errors
///
/// Returns an error if the SQLite database cannot be opened or migrated.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn TaskStore>, StoreError> {
    match config.backend {
        StoreBackend::Sqlite => Ok(Arc::new(SqliteTaskStore::open(&config.path)?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryTaskStore::new())),
    }
}

fn sort_for_listing(tasks: &mut [ScheduledTask]) {
    tasks.sort_by_key(|t| (t.scheduled_time, t.sequence));
}
