//! Task scheduler: owns the task lifecycle on top of a store and a wake timer.
//!
//! Every status transition runs under one transition lock and is written to
//! the store before the wake timer is touched. Executors run outside the
//! lock, so `schedule` and `cancel` never wait on a slow task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::clock::{self, Clock};
use crate::config::{RetryConfig, SchedulerConfig};
use crate::error::{Result, ScheduleError, StoreError};
use crate::events::{EventBus, VigilEvent};
use crate::notifications::Alert;
use crate::quality::QualityFeedback;
use crate::scheduler::executor::ExecutorRegistry;
use crate::scheduler::retry::{ErrorKind, RetryPolicy, RetryVerdict};
use crate::scheduler::tasks::{
    DispatchResult, ScheduledTask, TaskId, TaskRunOutcome, TaskRunRecord, TaskSpec, TaskStatus,
};
use crate::scheduler::wake::WakeTimer;
use crate::store::TaskStore;

/// What [`TaskScheduler::recover`] found in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Pending tasks that received a wake registration.
    pub rearmed: usize,
    /// Of those, tasks already due (they fire immediately).
    pub overdue: usize,
    /// Tasks found mid-dispatch and returned to pending.
    pub reclaimed: usize,
}

/// Schedules, dispatches, retries, and cancels persisted tasks.
pub struct TaskScheduler {
    config: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    wake: Arc<dyn WakeTimer>,
    clock: Arc<dyn Clock>,
    executors: ExecutorRegistry,
    retry: Mutex<RetryPolicy>,
    quality: Arc<QualityFeedback>,
    events: EventBus,
    alert_tx: Option<mpsc::UnboundedSender<Alert>>,
    sequence: AtomicU64,
    transitions: Mutex<()>,
    history: Mutex<VecDeque<TaskRunRecord>>,
}

impl TaskScheduler {
    /// Create a scheduler with built-in executors and default retry/quality settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot report its highest sequence number.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        wake: Arc<dyn WakeTimer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let sequence = store.max_sequence()?;
        Ok(Self {
            history: Mutex::new(VecDeque::with_capacity(config.history_limit.min(1024))),
            config,
            store,
            wake,
            clock,
            executors: ExecutorRegistry::with_builtins(),
            retry: Mutex::new(RetryPolicy::new(&RetryConfig::default())),
            quality: Arc::new(QualityFeedback::new(&crate::config::QualityConfig::default())),
            events: EventBus::new(),
            alert_tx: None,
            sequence: AtomicU64::new(sequence),
            transitions: Mutex::new(()),
        })
    }

    /// Replace the executor registry.
    pub fn with_executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Mutex::new(policy);
        self
    }

    /// Share a quality tracker.
    pub fn with_quality(mut self, quality: Arc<QualityFeedback>) -> Self {
        self.quality = quality;
        self
    }

    /// Publish lifecycle events on `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Forward alerts produced by executors to `tx`.
    pub fn with_alert_sender(mut self, tx: mpsc::UnboundedSender<Alert>) -> Self {
        self.alert_tx = Some(tx);
        self
    }

    /// The quality tracker fed by this scheduler.
    pub fn quality(&self) -> &Arc<QualityFeedback> {
        &self.quality
    }

    /// The event bus this scheduler publishes on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_deprioritized(&self, task_type: &str, priority: i32) -> bool {
        priority >= self.config.background_priority_threshold
            && self.quality.should_deprioritize(task_type)
    }

    /// Persist a new task and arm its wake timer.
    ///
    /// A due time slightly in the past (within the grace window) is clamped
    /// to now plus the minimal delay.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError`] for invalid input and [`StoreError`] when
    /// the task could not be persisted; nothing is armed in either case.
    pub fn schedule(&self, spec: TaskSpec) -> Result<TaskId> {
        let task_type = spec.task_type.trim().to_owned();
        if task_type.is_empty() {
            return Err(ScheduleError::EmptyTaskType.into());
        }
        spec.recurrence.validate()?;

        let now = self.clock.now();
        let mut due = spec.due_at;
        if due < now {
            let late = now - due;
            let grace = chrono::Duration::seconds(
                i64::try_from(self.config.grace_window_secs).unwrap_or(i64::MAX),
            );
            if late > grace {
                return Err(ScheduleError::DueInPast {
                    late_secs: late.num_seconds(),
                    grace_secs: self.config.grace_window_secs,
                }
                .into());
            }
            due = now
                + chrono::Duration::milliseconds(
                    i64::try_from(self.config.min_delay_ms).unwrap_or(i64::MAX),
                );
            debug!(%task_type, late_ms = late.num_milliseconds(), "due time clamped forward");
        }

        let mut first_attempt = due;
        if self.is_deprioritized(&task_type, spec.priority) {
            first_attempt += chrono::Duration::seconds(
                i64::try_from(self.config.deprioritized_delay_secs).unwrap_or(0),
            );
            info!(
                %task_type,
                delay_secs = self.config.deprioritized_delay_secs,
                "low-quality background task type deferred"
            );
        }

        let task = ScheduledTask {
            id: TaskId::new(),
            task_type,
            parameters: spec.parameters,
            scheduled_time: first_attempt,
            anchor_time: due,
            priority: spec.priority,
            recurrence: spec.recurrence,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: spec
                .max_retries
                .unwrap_or(self.config.default_max_retries),
            last_error: None,
            last_attempt_time: None,
            finished_at: None,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            created_at: now,
        };

        {
            let _guard = self.lock_transitions();
            self.store.insert(&task)?;
            self.wake.arm(task.id, task.scheduled_time);
        }

        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            due = %task.scheduled_time,
            recurrence = %task.recurrence,
            "task scheduled"
        );
        self.events.publish(VigilEvent::TaskScheduled {
            id: task.id,
            task_type: task.task_type.clone(),
            due: task.scheduled_time,
        });
        Ok(task.id)
    }

    /// Cancel a pending task.
    ///
    /// Returns `Ok(false)` without error when the task is unknown, already
    /// dispatching, or terminal.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store fails.
    pub fn cancel(&self, id: TaskId) -> Result<bool> {
        let now = self.clock.now();
        {
            let _guard = self.lock_transitions();
            if !self
                .store
                .compare_and_swap_status(id, TaskStatus::Pending, TaskStatus::Cancelled)?
            {
                debug!(task_id = %id, "cancel is a no-op: task not pending");
                return Ok(false);
            }
            self.wake.disarm(id);
            if let Some(mut task) = self.store.get(id)? {
                task.finished_at = Some(now);
                self.store.upsert(&task)?;
            }
        }
        info!(task_id = %id, "task cancelled");
        self.events.publish(VigilEvent::TaskCancelled { id });
        Ok(true)
    }

    /// Cancel every pending task. Returns how many were cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn cancel_all(&self) -> Result<usize> {
        let mut cancelled = 0;
        for task in self.store.list_by_status(TaskStatus::Pending)? {
            if self.cancel(task.id)? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Move a fired task from pending to dispatching.
    ///
    /// Returns `None` when the task was cancelled, already claimed, or gone,
    /// which makes a late or duplicate fire harmless.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn claim(&self, id: TaskId) -> Result<Option<ScheduledTask>> {
        let now = self.clock.now();
        let claimed = {
            let _guard = self.lock_transitions();
            if !self
                .store
                .compare_and_swap_status(id, TaskStatus::Pending, TaskStatus::Dispatching)?
            {
                debug!(task_id = %id, "fire ignored: task not pending");
                return Ok(None);
            }
            // A direct fire may arrive ahead of the timer's own registration.
            self.wake.disarm(id);
            let Some(mut task) = self.store.get(id)? else {
                return Ok(None);
            };
            task.last_attempt_time = Some(now);
            self.store.upsert(&task)?;
            task
        };
        debug!(task_id = %id, task_type = %claimed.task_type, "task fired");
        self.events.publish(VigilEvent::TaskFired { id });
        Ok(Some(claimed))
    }

    /// Claim every id in a fired batch, in dispatch order: ascending
    /// priority, then due time, then insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn claim_batch(&self, ids: &[TaskId]) -> Result<Vec<ScheduledTask>> {
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = self.claim(*id)? {
                claimed.push(task);
            }
        }
        claimed.sort_by_key(ScheduledTask::dispatch_key);
        Ok(claimed)
    }

    /// Invoke the executor for a claimed task, bounded by the executor timeout.
    pub async fn execute(&self, task: &ScheduledTask) -> DispatchResult {
        let budget = Duration::from_secs(self.config.executor_timeout_secs);
        match tokio::time::timeout(
            budget,
            self.executors.dispatch(&task.task_type, &task.parameters),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => DispatchResult::Failure {
                kind: ErrorKind::Timeout,
                message: format!("executor exceeded {}s", budget.as_secs()),
            },
        }
    }

    /// Execute a claimed task and apply the result.
    ///
    /// # Errors
    ///
    /// Returns an error when the outcome could not be persisted.
    pub async fn run_claimed(&self, task: ScheduledTask) -> Result<TaskRunOutcome> {
        let started = tokio::time::Instant::now();
        let result = self.execute(&task).await;
        self.complete(task, result, started.elapsed())
    }

    /// Claim and run one fired task. Returns `None` if the fire was stale.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn on_fire(&self, id: TaskId) -> Result<Option<TaskRunOutcome>> {
        match self.claim(id)? {
            Some(task) => self.run_claimed(task).await.map(Some),
            None => Ok(None),
        }
    }

    /// Claim and run a batch of fired tasks sequentially in dispatch order.
    ///
    /// # Errors
    ///
    /// Returns the first store failure; tasks after it are left claimed and
    /// are reclaimed by the next [`recover`](Self::recover).
    pub async fn on_fire_batch(&self, ids: &[TaskId]) -> Result<Vec<(TaskId, TaskRunOutcome)>> {
        let mut outcomes = Vec::new();
        for task in self.claim_batch(ids)? {
            let id = task.id;
            outcomes.push((id, self.run_claimed(task).await?));
        }
        Ok(outcomes)
    }

    /// Apply an executor result to a dispatching task.
    ///
    /// # Errors
    ///
    /// Returns an error when the new state could not be persisted.
    pub fn complete(
        &self,
        task: ScheduledTask,
        result: DispatchResult,
        latency: Duration,
    ) -> Result<TaskRunOutcome> {
        let now = self.clock.now();
        let started_at = task.last_attempt_time.unwrap_or(now);

        let (success, confidence) = match &result {
            DispatchResult::Success(output) => (true, output.confidence().unwrap_or(1.0)),
            _ => (false, 0.0),
        };
        self.quality
            .record_execution(&task.task_type, latency, confidence, success);

        let mut task = task;
        let id = task.id;
        let (outcome, summary, event) = match result {
            DispatchResult::Success(output) => {
                if let Some(alert) = output.alert {
                    self.forward_alert(id, alert);
                }
                self.finish_success(&mut task, now)?
            }
            DispatchResult::Failure { kind, message } => {
                self.finish_failure(&mut task, kind, message, now)?
            }
            DispatchResult::PermanentFailure(reason) => {
                let _guard = self.lock_transitions();
                warn!(task_id = %id, task_type = %task.task_type, "permanent failure: {reason}");
                task.status = TaskStatus::Failed;
                task.finished_at = Some(now);
                task.last_error = Some(reason.clone());
                self.store.upsert(&task)?;
                (
                    TaskRunOutcome::Failed,
                    format!("failed permanently: {reason}"),
                    VigilEvent::TaskFailed { id, error: reason },
                )
            }
        };

        self.events.publish(event);
        self.push_history(TaskRunRecord {
            task_id: id,
            task_type: task.task_type,
            started_at,
            finished_at: now,
            outcome,
            summary,
        });
        Ok(outcome)
    }

    fn finish_success(
        &self,
        task: &mut ScheduledTask,
        now: DateTime<Utc>,
    ) -> Result<(TaskRunOutcome, String, VigilEvent)> {
        let id = task.id;
        let _guard = self.lock_transitions();
        let next = task
            .recurrence
            .next_after(task.anchor_time, task.scheduled_time, now);

        match next {
            Some(next) => {
                task.anchor_time = next;
                task.scheduled_time = next;
                task.status = TaskStatus::Pending;
                task.retry_count = 0;
                task.last_error = None;
                self.store.upsert(task)?;
                self.wake.arm(id, next);
                info!(task_id = %id, next = %next, "recurring task rescheduled");
                Ok((
                    TaskRunOutcome::Rescheduled,
                    format!("next occurrence at {next}"),
                    VigilEvent::TaskRescheduled { id, next },
                ))
            }
            None => {
                if task.is_recurring() {
                    warn!(task_id = %id, recurrence = %task.recurrence, "recurrence produced no next occurrence");
                }
                task.status = TaskStatus::Completed;
                task.finished_at = Some(now);
                self.store.upsert(task)?;
                info!(task_id = %id, task_type = %task.task_type, "task completed");
                Ok((
                    TaskRunOutcome::Completed,
                    "completed".to_owned(),
                    VigilEvent::TaskCompleted { id },
                ))
            }
        }
    }

    fn finish_failure(
        &self,
        task: &mut ScheduledTask,
        kind: ErrorKind,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<(TaskRunOutcome, String, VigilEvent)> {
        let id = task.id;
        let deprioritized = self.is_deprioritized(&task.task_type, task.priority);
        let verdict = self
            .retry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .evaluate(kind, task.retry_count, task.max_retries, deprioritized, now);

        let _guard = self.lock_transitions();
        task.last_error = Some(message.clone());
        match verdict {
            RetryVerdict::RetryAfter(delay) => {
                task.retry_count += 1;
                let at = now
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                task.scheduled_time = at;
                task.status = TaskStatus::Pending;
                self.store.upsert(task)?;
                self.wake.arm(id, at);
                warn!(
                    task_id = %id,
                    attempt = task.retry_count,
                    max_retries = task.max_retries,
                    %kind,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "task failed, retry armed: {message}"
                );
                Ok((
                    TaskRunOutcome::Retrying,
                    format!("retry {} in {}s ({kind}): {message}", task.retry_count, delay.as_secs()),
                    VigilEvent::TaskRetrying {
                        id,
                        attempt: task.retry_count,
                        kind,
                        delay,
                    },
                ))
            }
            RetryVerdict::GiveUp(reason) => {
                task.status = TaskStatus::Failed;
                task.finished_at = Some(now);
                self.store.upsert(task)?;
                error!(task_id = %id, task_type = %task.task_type, %kind, "task failed: {message} ({reason})");
                Ok((
                    TaskRunOutcome::Failed,
                    format!("failed: {message} ({reason})"),
                    VigilEvent::TaskFailed { id, error: message },
                ))
            }
        }
    }

    fn forward_alert(&self, id: TaskId, alert: Alert) {
        match &self.alert_tx {
            Some(tx) => {
                if tx.send(alert).is_err() {
                    warn!(task_id = %id, "alert receiver closed, alert dropped");
                }
            }
            None => debug!(task_id = %id, title = %alert.title, "no alert receiver configured"),
        }
    }

    fn push_history(&self, record: TaskRunRecord) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(record);
        while history.len() > self.config.history_limit.max(1) {
            history.pop_front();
        }
    }

    /// Re-arm every pending task after a restart.
    ///
    /// Tasks left dispatching by a crash go back to pending first. Overdue
    /// tasks are armed at their stored time and fire immediately.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let now = self.clock.now();
        let mut report = RecoveryReport::default();
        let _guard = self.lock_transitions();

        for mut task in self.store.list_by_status(TaskStatus::Dispatching)? {
            task.status = TaskStatus::Pending;
            self.store.upsert(&task)?;
            warn!(task_id = %task.id, "task was mid-dispatch at shutdown, returned to pending");
            report.reclaimed += 1;
        }

        for task in self.store.list_by_status(TaskStatus::Pending)? {
            self.wake.arm(task.id, task.scheduled_time);
            report.rearmed += 1;
            if task.scheduled_time <= now {
                report.overdue += 1;
            }
        }

        info!(
            rearmed = report.rearmed,
            overdue = report.overdue,
            reclaimed = report.reclaimed,
            "scheduler recovered"
        );
        Ok(report)
    }

    /// Delete terminal tasks older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn purge_expired(&self) -> Result<usize> {
        let cutoff = self.clock.now()
            - chrono::Duration::seconds(i64::try_from(self.config.retention_secs).unwrap_or(i64::MAX));
        let purged = self.store.purge_terminal_before(cutoff)?;
        if purged > 0 {
            info!(purged, "expired tasks purged");
        }
        Ok(purged)
    }

    /// Fetch one task.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn get(&self, id: TaskId) -> Result<Option<ScheduledTask>> {
        Ok(self.store.get(id)?)
    }

    /// Tasks in `status`, or every task when `None`.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<ScheduledTask>> {
        let tasks: std::result::Result<Vec<ScheduledTask>, StoreError> = match status {
            Some(status) => self.store.list_by_status(status),
            None => self.store.list_all(),
        };
        Ok(tasks?)
    }

    /// Pending tasks due after now, soonest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn upcoming(&self) -> Result<Vec<ScheduledTask>> {
        let now = self.clock.now();
        Ok(self
            .store
            .list_by_status(TaskStatus::Pending)?
            .into_iter()
            .filter(|t| t.scheduled_time > now)
            .collect())
    }

    /// Recent run history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<TaskRunRecord> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Time until `id` is due, if it is pending.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn time_until_due(&self, id: TaskId) -> Result<Option<Duration>> {
        Ok(self
            .store
            .get(id)?
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| clock::until(self.clock.now(), t.scheduled_time)))
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("executors", &self.executors)
            .field("armed", &self.wake.armed_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;
    use crate::notifications::Importance;
    use crate::scheduler::executor::{FnExecutor, NOTIFY_TASK_TYPE, TaskExecutor};
    use crate::scheduler::recurrence::Recurrence;
    use crate::scheduler::wake::ManualWakeTimer;
    use crate::store::MemoryTaskStore;

    struct Fixture {
        clock: Arc<ManualClock>,
        wake: Arc<ManualWakeTimer>,
        store: Arc<MemoryTaskStore>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        Fixture {
            clock: Arc::new(ManualClock::new(start())),
            wake: Arc::new(ManualWakeTimer::new()),
            store: Arc::new(MemoryTaskStore::new()),
        }
    }

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            jitter_ratio: 0.0,
            ..RetryConfig::default()
        })
    }

    fn scheduler(f: &Fixture, executors: ExecutorRegistry) -> TaskScheduler {
        TaskScheduler::new(
            SchedulerConfig::default(),
            f.store.clone(),
            f.wake.clone(),
            f.clock.clone(),
        )
        .unwrap()
        .with_executors(executors)
        .with_retry_policy(no_jitter())
    }

    fn registry(task_type: &str, result: DispatchResult) -> ExecutorRegistry {
        let mut executors = ExecutorRegistry::new();
        executors.register(
            task_type,
            Arc::new(FnExecutor::new(move |_: &BTreeMap<String, String>| {
                result.clone()
            })),
        );
        executors
    }

    #[test]
    fn schedule_persists_and_arms() {
        let f = fixture();
        let s = scheduler(&f, ExecutorRegistry::new());
        let due = start() + chrono::Duration::minutes(10);
        let id = s.schedule(TaskSpec::new("check", due).param("k", "v")).unwrap();

        let task = s.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.scheduled_time, due);
        assert_eq!(task.parameters.get("k").map(String::as_str), Some("v"));
        assert_eq!(task.max_retries, 3);
        assert_eq!(f.wake.due_time(id), Some(due));
        assert_eq!(s.upcoming().unwrap().len(), 1);
    }

    #[test]
    fn schedule_rejects_bad_input() {
        let f = fixture();
        let s = scheduler(&f, ExecutorRegistry::new());
        let err = s.schedule(TaskSpec::new("  ", start())).unwrap_err();
        assert!(matches!(err, crate::VigilError::Schedule(ScheduleError::EmptyTaskType)));

        let err = s
            .schedule(TaskSpec::new("check", start() - chrono::Duration::minutes(5)))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::VigilError::Schedule(ScheduleError::DueInPast { late_secs: 300, .. })
        ));

        let err = s
            .schedule(
                TaskSpec::new("check", start()).recurrence(Recurrence::FixedInterval { secs: 0 }),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::VigilError::Schedule(ScheduleError::InvalidRecurrence(_))
        ));
        let err = s
            .schedule(
                TaskSpec::new("check", start())
                    .recurrence(Recurrence::FixedInterval { secs: 1 << 60 }),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::VigilError::Schedule(ScheduleError::InvalidRecurrence(_))
        ));
        assert_eq!(f.wake.armed_count(), 0);
        assert!(s.list(None).unwrap().is_empty());
    }

    #[test]
    fn slightly_late_due_time_is_clamped() {
        let f = fixture();
        let s = scheduler(&f, ExecutorRegistry::new());
        let id = s
            .schedule(TaskSpec::new("check", start() - chrono::Duration::seconds(20)))
            .unwrap();
        assert_eq!(
            f.wake.due_time(id),
            Some(start() + chrono::Duration::seconds(1))
        );
    }

    #[test]
    fn cancel_is_idempotent() {
        let f = fixture();
        let s = scheduler(&f, ExecutorRegistry::new());
        let id = s
            .schedule(TaskSpec::new("check", start() + chrono::Duration::hours(1)))
            .unwrap();
        assert!(s.cancel(id).unwrap());
        assert!(!f.wake.is_armed(id));
        assert!(!s.cancel(id).unwrap());
        assert!(!s.cancel(TaskId::new()).unwrap());

        let task = s.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.finished_at.is_some());
        assert!(s.claim(id).unwrap().is_none());
    }

    #[test]
    fn claimed_task_cannot_be_cancelled() {
        let f = fixture();
        let s = scheduler(&f, ExecutorRegistry::new());
        let id = s.schedule(TaskSpec::new("check", start())).unwrap();
        assert!(s.claim(id).unwrap().is_some());
        assert!(!s.cancel(id).unwrap());
        assert!(s.claim(id).unwrap().is_none());
    }

    #[tokio::test]
    async fn one_off_success_completes() {
        let f = fixture();
        let s = scheduler(&f, registry("check", DispatchResult::success()));
        let id = s.schedule(TaskSpec::new("check", start())).unwrap();
        f.clock.advance(chrono::Duration::seconds(1));

        assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Completed));
        let task = s.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(!f.wake.is_armed(id));
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.on_fire(id).await.unwrap(), None);
        assert!(s.quality().quality_score("check").unwrap() > 0.9);
    }

    #[tokio::test]
    async fn early_fire_leaves_no_registration_behind() {
        let f = fixture();
        let s = scheduler(
            &f,
            registry("open", DispatchResult::PermanentFailure("no such app".to_owned())),
        );
        let later = s
            .schedule(TaskSpec::new("open", start() + chrono::Duration::hours(1)))
            .unwrap();
        let sooner = s
            .schedule(TaskSpec::new("open", start() + chrono::Duration::minutes(5)))
            .unwrap();
        assert_eq!(f.wake.armed_count(), 2);

        // Fired by hand while both timers are still armed.
        let outcomes = s.on_fire_batch(&[later, sooner]).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(f.wake.armed_count(), 0);
        for id in [later, sooner] {
            assert_eq!(s.get(id).unwrap().unwrap().status, TaskStatus::Failed);
        }
        assert!(f.wake.take_due(start() + chrono::Duration::days(1)).is_empty());
    }

    #[tokio::test]
    async fn recurring_success_rearms_strictly_later() {
        let f = fixture();
        let s = scheduler(&f, registry("digest", DispatchResult::success()));
        let id = s
            .schedule(TaskSpec::new("digest", start()).recurrence(Recurrence::every_hours(24)))
            .unwrap();

        // Run late; the next occurrence keeps its anchored cadence.
        f.clock.advance(chrono::Duration::minutes(7));
        assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Rescheduled));

        let task = s.get(id).unwrap().unwrap();
        let expected = start() + chrono::Duration::hours(24);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.scheduled_time, expected);
        assert_eq!(f.wake.due_time(id), Some(expected));
    }

    #[tokio::test]
    async fn retries_back_off_then_fail() {
        let f = fixture();
        let s = scheduler(&f, registry("sync", DispatchResult::failure("network unreachable")));
        let id = s
            .schedule(TaskSpec::new("sync", start()).max_retries(2))
            .unwrap();

        assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Retrying));
        let first = f.wake.due_time(id).unwrap();
        assert_eq!(first, start() + chrono::Duration::seconds(5));

        f.clock.set(first);
        assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Retrying));
        let second = f.wake.due_time(id).unwrap();
        assert_eq!(second, first + chrono::Duration::seconds(10));

        f.clock.set(second);
        assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Failed));
        let task = s.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 2);
        assert_eq!(task.last_error.as_deref(), Some("network unreachable"));
        assert!(!f.wake.is_armed(id));
    }

    #[tokio::test]
    async fn permanent_failure_skips_retry_budget() {
        let f = fixture();
        let s = scheduler(
            &f,
            registry("open", DispatchResult::PermanentFailure("no such app".to_owned())),
        );
        let id = s.schedule(TaskSpec::new("open", start()).max_retries(5)).unwrap();
        assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Failed));
        assert_eq!(s.get(id).unwrap().unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn non_retryable_kind_fails_immediately() {
        let f = fixture();
        let s = scheduler(&f, registry("call", DispatchResult::failure("permission denied")));
        let id = s.schedule(TaskSpec::new("call", start())).unwrap();
        assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Failed));
    }

    #[tokio::test]
    async fn unknown_type_fails_permanently() {
        let f = fixture();
        let s = scheduler(&f, ExecutorRegistry::new());
        let id = s.schedule(TaskSpec::new("mystery", start())).unwrap();
        assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Failed));
        let task = s.get(id).unwrap().unwrap();
        assert!(task.last_error.unwrap().contains("mystery"));
    }

    #[tokio::test]
    async fn batch_runs_in_priority_then_time_then_insertion_order() {
        let f = fixture();
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        let mut executors = ExecutorRegistry::new();
        executors.register(
            "step",
            Arc::new(FnExecutor::new(move |p: &BTreeMap<String, String>| {
                seen.lock().unwrap().push(p["name"].clone());
                DispatchResult::success()
            })),
        );
        let s = scheduler(&f, executors);

        let later = start() + chrono::Duration::seconds(1);
        let mut ids = Vec::new();
        for (name, priority, due) in [
            ("b", 1, start()),
            ("c", 1, start()),
            ("a", 0, later),
            ("e", 2, start()),
            ("d", 1, later),
        ] {
            ids.push(
                s.schedule(TaskSpec::new("step", due).priority(priority).param("name", name))
                    .unwrap(),
            );
        }
        f.clock.set(later);
        let outcomes = s.on_fire_batch(&ids).await.unwrap();
        assert_eq!(outcomes.len(), 5);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c", "d", "e"]);
    }

    struct Stalls;

    #[async_trait]
    impl TaskExecutor for Stalls {
        async fn execute(&self, _: &str, _: &BTreeMap<String, String>) -> DispatchResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            DispatchResult::success()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_executor_times_out() {
        let f = fixture();
        let mut executors = ExecutorRegistry::new();
        executors.register("slow", Arc::new(Stalls));
        let s = scheduler(&f, executors);
        let id = s.schedule(TaskSpec::new("slow", start())).unwrap();
        let task = s.claim(id).unwrap().unwrap();
        let result = s.execute(&task).await;
        assert!(matches!(
            result,
            DispatchResult::Failure {
                kind: ErrorKind::Timeout,
                ..
            }
        ));
        assert_eq!(s.complete(task, result, Duration::from_secs(30)).unwrap(), TaskRunOutcome::Retrying);
    }

    #[test]
    fn recover_rearms_pending_and_reclaims_dispatching() {
        let f = fixture();
        let s = scheduler(&f, ExecutorRegistry::new());
        let overdue = s.schedule(TaskSpec::new("a", start())).unwrap();
        let future = s
            .schedule(TaskSpec::new("b", start() + chrono::Duration::hours(2)))
            .unwrap();
        let stuck = s.schedule(TaskSpec::new("c", start())).unwrap();
        s.claim(stuck).unwrap();
        f.clock.advance(chrono::Duration::minutes(1));

        // Simulate a fresh process over the same store.
        let wake = Arc::new(ManualWakeTimer::new());
        let restarted = TaskScheduler::new(
            SchedulerConfig::default(),
            f.store.clone(),
            wake.clone(),
            f.clock.clone(),
        )
        .unwrap();
        let report = restarted.recover().unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                rearmed: 3,
                overdue: 2,
                reclaimed: 1
            }
        );
        for id in [overdue, future, stuck] {
            assert!(wake.is_armed(id));
        }
        assert_eq!(wake.take_due(f.clock.now()).len(), 2);

        let next = restarted
            .schedule(TaskSpec::new("d", f.clock.now() + chrono::Duration::hours(1)))
            .unwrap();
        assert!(restarted.get(next).unwrap().unwrap().sequence > 3);
    }

    #[tokio::test]
    async fn low_quality_background_type_is_deferred() {
        let f = fixture();
        let s = scheduler(&f, ExecutorRegistry::new());
        for _ in 0..4 {
            s.quality()
                .record_execution("scan", Duration::from_secs(3), 0.0, false);
        }
        let due = start() + chrono::Duration::minutes(1);
        let background = s.schedule(TaskSpec::new("scan", due).priority(5)).unwrap();
        let foreground = s.schedule(TaskSpec::new("scan", due).priority(0)).unwrap();
        assert_eq!(
            f.wake.due_time(background),
            Some(due + chrono::Duration::seconds(300))
        );
        assert_eq!(f.wake.due_time(foreground), Some(due));
    }

    #[test]
    fn purge_removes_old_terminal_tasks() {
        let f = fixture();
        let s = scheduler(&f, ExecutorRegistry::new());
        let id = s
            .schedule(TaskSpec::new("check", start() + chrono::Duration::hours(1)))
            .unwrap();
        s.cancel(id).unwrap();
        assert_eq!(s.purge_expired().unwrap(), 0);
        f.clock.advance(chrono::Duration::days(8));
        assert_eq!(s.purge_expired().unwrap(), 1);
        assert!(s.get(id).unwrap().is_none());
    }

    #[tokio::test]
    async fn notify_task_forwards_alert() {
        let f = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let s = scheduler(&f, ExecutorRegistry::with_builtins()).with_alert_sender(tx);
        let id = s
            .schedule(
                TaskSpec::new(NOTIFY_TASK_TYPE, start())
                    .param("title", "Stand up")
                    .param("importance", "high"),
            )
            .unwrap();
        assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Completed));
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.title, "Stand up");
        assert_eq!(alert.importance, Importance::High);
    }
}
