//! In-process task store. Nothing survives a restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{TaskStore, sort_for_listing};
use crate::error::StoreError;
use crate::scheduler::{ScheduledTask, TaskId, TaskStatus};

/// Volatile store guarded by a single mutex.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<TaskId, ScheduledTask>>,
}

impl MemoryTaskStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<TaskId, ScheduledTask>>, StoreError> {
        self.tasks.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl TaskStore for MemoryTaskStore {
    fn insert(&self, task: &ScheduledTask) -> Result<(), StoreError> {
        let mut tasks = self.lock()?;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id.to_string()));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn upsert(&self, task: &ScheduledTask) -> Result<(), StoreError> {
        self.lock()?.insert(task.id, task.clone());
        Ok(())
    }

    fn get(&self, id: TaskId) -> Result<Option<ScheduledTask>, StoreError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(&id).is_some())
    }

    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<ScheduledTask>, StoreError> {
        let mut tasks: Vec<ScheduledTask> = self
            .lock()?
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        sort_for_listing(&mut tasks);
        Ok(tasks)
    }

    fn list_all(&self) -> Result<Vec<ScheduledTask>, StoreError> {
        let mut tasks: Vec<ScheduledTask> = self.lock()?.values().cloned().collect();
        sort_for_listing(&mut tasks);
        Ok(tasks)
    }

    fn compare_and_swap_status(
        &self,
        id: TaskId,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.lock()?;
        match tasks.get_mut(&id) {
            Some(task) if task.status == expected => {
                task.status = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tasks = self.lock()?;
        let before = tasks.len();
        tasks.retain(|_, t| {
            !(t.status.is_terminal() && t.finished_at.is_some_and(|at| at < cutoff))
        });
        Ok(before - tasks.len())
    }
}
