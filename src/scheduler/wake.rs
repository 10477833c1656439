//! Wake timers: the primitive that tells the scheduler a task is due.
//!
//! A timer keeps at most one registration per task. Arming an id that is
//! already armed replaces the previous registration, and a registration
//! that was replaced or disarmed never reports a fire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::clock::{self, Clock};
use crate::error::{Result, VigilError};
use crate::scheduler::tasks::TaskId;

/// Arms and disarms per-task wake-ups.
pub trait WakeTimer: Send + Sync {
    /// Fire `id` at or after `at`. Replaces any existing registration for `id`.
    fn arm(&self, id: TaskId, at: DateTime<Utc>);

    /// Drop the registration for `id`. Returns `false` if none existed.
    fn disarm(&self, id: TaskId) -> bool;

    /// Whether `id` currently has a registration.
    fn is_armed(&self, id: TaskId) -> bool;

    /// Number of live registrations.
    fn armed_count(&self) -> usize;
}

struct Registration {
    generation: u64,
    abort: AbortHandle,
}

#[derive(Default)]
struct Registry {
    next_generation: u64,
    entries: HashMap<TaskId, Registration>,
}

/// Wake timer backed by tokio sleeps. Fired ids arrive on the receiver
/// returned by [`TokioWakeTimer::new`].
pub struct TokioWakeTimer {
    clock: Arc<dyn Clock>,
    handle: Handle,
    registry: Arc<Mutex<Registry>>,
    fire_tx: mpsc::UnboundedSender<TaskId>,
}

impl TokioWakeTimer {
    /// Create a timer spawning onto `handle`.
    pub fn new(
        clock: Arc<dyn Clock>,
        handle: Handle,
    ) -> (Self, mpsc::UnboundedReceiver<TaskId>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let timer = Self {
            clock,
            handle,
            registry: Arc::new(Mutex::new(Registry::default())),
            fire_tx,
        };
        (timer, fire_rx)
    }

    /// Create a timer on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub fn on_current_runtime(
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TaskId>)> {
        let handle = Handle::try_current()
            .map_err(|e| VigilError::Channel(format!("no tokio runtime for wake timer: {e}")))?;
        Ok(Self::new(clock, handle))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl WakeTimer for TokioWakeTimer {
    fn arm(&self, id: TaskId, at: DateTime<Utc>) {
        let delay = clock::until(self.clock.now(), at);
        let mut registry = self.lock();
        registry.next_generation += 1;
        let generation = registry.next_generation;

        let shared = Arc::clone(&self.registry);
        let fire_tx = self.fire_tx.clone();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let still_current = {
                let mut registry = shared.lock().unwrap_or_else(|e| e.into_inner());
                match registry.entries.get(&id) {
                    Some(reg) if reg.generation == generation => {
                        registry.entries.remove(&id);
                        true
                    }
                    _ => false,
                }
            };
            if still_current {
                trace!(task_id = %id, "wake timer fired");
                if fire_tx.send(id).is_err() {
                    debug!(task_id = %id, "wake receiver closed, dropping fire");
                }
            }
        });

        if let Some(previous) = registry.entries.insert(
            id,
            Registration {
                generation,
                abort: join.abort_handle(),
            },
        ) {
            previous.abort.abort();
        }
        debug!(task_id = %id, due = %at, delay_ms = delay.as_millis() as u64, "wake timer armed");
    }

    fn disarm(&self, id: TaskId) -> bool {
        let removed = self.lock().entries.remove(&id);
        match removed {
            Some(reg) => {
                reg.abort.abort();
                debug!(task_id = %id, "wake timer disarmed");
                true
            }
            None => false,
        }
    }

    fn is_armed(&self, id: TaskId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    fn armed_count(&self) -> usize {
        self.lock().entries.len()
    }
}

/// Wake timer that only records registrations. Tests and simulations
/// decide when to fire by calling [`ManualWakeTimer::take_due`].
#[derive(Debug, Default)]
pub struct ManualWakeTimer {
    armed: Mutex<HashMap<TaskId, DateTime<Utc>>>,
}

impl ManualWakeTimer {
    /// Empty timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every registration due at or before `now`.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        let due: Vec<TaskId> = armed
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            armed.remove(id);
        }
        due
    }

    /// Registered due time for `id`.
    #[must_use]
    pub fn due_time(&self, id: TaskId) -> Option<DateTime<Utc>> {
        self.armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .copied()
    }
}

impl WakeTimer for ManualWakeTimer {
    fn arm(&self, id: TaskId, at: DateTime<Utc>) {
        self.armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, at);
    }

    fn disarm(&self, id: TaskId) -> bool {
        self.armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    fn is_armed(&self, id: TaskId) -> bool {
        self.armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&id)
    }

    fn armed_count(&self) -> usize {
        self.armed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
