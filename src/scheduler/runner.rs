//! Scheduler background loop.
//!
//! Waits for wake-timer fires, drains whatever else fired in the same
//! instant into one batch, and dispatches the batch in priority order.
//! Pooled dispatch hands each task to a semaphore-bounded worker so one
//! slow executor cannot hold back other due tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DispatchMode, SchedulerConfig};
use crate::scheduler::engine::TaskScheduler;
use crate::scheduler::tasks::{ScheduledTask, TaskId};

/// Drives a [`TaskScheduler`] from a stream of fired task ids.
pub struct SchedulerRunner {
    scheduler: Arc<TaskScheduler>,
    fired: mpsc::UnboundedReceiver<TaskId>,
    mode: DispatchMode,
    permits: Arc<Semaphore>,
    pool_size: u32,
    maintenance_interval: Duration,
    shutdown: CancellationToken,
}

impl SchedulerRunner {
    /// Create a runner reading fires from `fired`.
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        fired: mpsc::UnboundedReceiver<TaskId>,
        config: &SchedulerConfig,
    ) -> Self {
        let pool_size = config.max_concurrent_dispatches.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            scheduler,
            fired,
            mode: config.dispatch_mode,
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size: u32::try_from(pool_size).unwrap_or(u32::MAX),
            maintenance_interval: Duration::from_secs(config.maintenance_interval_secs.max(1)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Token that stops this runner.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the loop onto the current runtime.
    pub fn run(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run_loop())
    }

    async fn run_loop(mut self) {
        info!(mode = ?self.mode, "scheduler runner started");
        let mut maintenance = tokio::time::interval(self.maintenance_interval);
        // The first tick completes immediately; purge on startup is fine.

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!("scheduler runner shutting down");
                    break;
                }
                fired = self.fired.recv() => {
                    let Some(first) = fired else {
                        debug!("wake channel closed, stopping runner");
                        break;
                    };
                    let mut batch = vec![first];
                    while let Ok(next) = self.fired.try_recv() {
                        batch.push(next);
                    }
                    dispatch_batch(&self.scheduler, &self.permits, self.mode, &batch).await;
                }
                _ = maintenance.tick() => {
                    if let Err(e) = self.scheduler.purge_expired() {
                        warn!("retention purge failed: {e}");
                    }
                }
            }
        }

        // Let in-flight workers finish their current attempt.
        if self.mode == DispatchMode::Pooled {
            let _ = self.permits.acquire_many(self.pool_size).await;
        }
        info!("scheduler runner stopped");
    }
}

/// Claim a fired batch and run it in dispatch order.
async fn dispatch_batch(
    scheduler: &Arc<TaskScheduler>,
    permits: &Arc<Semaphore>,
    mode: DispatchMode,
    batch: &[TaskId],
) {
    let claimed = match scheduler.claim_batch(batch) {
        Ok(claimed) => claimed,
        Err(e) => {
            error!(batch = batch.len(), "failed to claim fired tasks: {e}");
            return;
        }
    };
    if claimed.len() > 1 {
        debug!(tasks = claimed.len(), "dispatching batch");
    }

    for task in claimed {
        match mode {
            DispatchMode::Inline => run_one(scheduler, task).await,
            DispatchMode::Pooled => {
                let Ok(permit) = Arc::clone(permits).acquire_owned().await else {
                    warn!("worker pool closed, dropping dispatch");
                    return;
                };
                let scheduler = Arc::clone(scheduler);
                tokio::spawn(async move {
                    run_one(&scheduler, task).await;
                    drop(permit);
                });
            }
        }
    }
}

async fn run_one(scheduler: &TaskScheduler, task: ScheduledTask) {
    let id = task.id;
    if let Err(e) = scheduler.run_claimed(task).await {
        // The task stays DISPATCHING and is reclaimed on the next recovery.
        error!(task_id = %id, "failed to record task outcome: {e}");
    }
}
