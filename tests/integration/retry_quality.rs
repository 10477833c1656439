//! Retry bounds, per-kind retry windows, and quality feedback.

use std::sync::Arc;
use std::time::Duration;

use vigil::clock::{Clock, ManualClock};
use vigil::config::{RetryConfig, SchedulerConfig};
use vigil::scheduler::{
    ManualWakeTimer, Recurrence, TaskRunOutcome, TaskScheduler, TaskSpec, TaskStatus,
    WakeTimer,
};
use vigil::store::MemoryTaskStore;

use crate::helpers::{Switchable, epoch, exact_retry, manual_scheduler, registry_with};

#[tokio::test]
async fn daily_task_retries_twice_then_fails_and_loses_quality() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let wake = Arc::new(ManualWakeTimer::new());
    let executor = Arc::new(Switchable::default());
    let s = manual_scheduler(
        Arc::new(MemoryTaskStore::new()),
        clock.clone(),
        wake.clone(),
        registry_with("sync", executor.clone()),
    );

    let id = s
        .schedule(
            TaskSpec::new("sync", epoch())
                .recurrence(Recurrence::every_hours(24))
                .max_retries(2),
        )
        .unwrap();

    // A healthy first occurrence establishes the baseline score.
    assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Rescheduled));
    let healthy = s.quality().quality_score("sync").unwrap();
    let t = epoch() + chrono::Duration::hours(24);
    assert_eq!(wake.due_time(id), Some(t));

    executor.set_failing(true);
    clock.set(t);
    assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Retrying));
    let first_retry = wake.due_time(id).unwrap();
    assert_eq!(first_retry, t + chrono::Duration::seconds(5));

    clock.set(first_retry);
    assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Retrying));
    let second_retry = wake.due_time(id).unwrap();
    assert_eq!(second_retry - first_retry, chrono::Duration::seconds(10));

    clock.set(second_retry);
    assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Failed));

    let task = s.get(id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert!(task.last_error.is_some());
    assert!(!wake.is_armed(id));
    assert_eq!(executor.calls(), 4);

    let degraded = s.quality().quality_score("sync").unwrap();
    assert!(degraded < healthy, "{degraded} should be below {healthy}");

    let outcomes: Vec<TaskRunOutcome> = s.history().iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            TaskRunOutcome::Rescheduled,
            TaskRunOutcome::Retrying,
            TaskRunOutcome::Retrying,
            TaskRunOutcome::Failed
        ]
    );
}

#[tokio::test]
async fn per_kind_window_caps_retries_across_tasks() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let wake = Arc::new(ManualWakeTimer::new());
    let executor = Arc::new(Switchable::default());
    executor.set_failing(true);

    let s = TaskScheduler::new(
        SchedulerConfig::default(),
        Arc::new(MemoryTaskStore::new()),
        wake.clone(),
        clock.clone(),
    )
    .unwrap()
    .with_executors(registry_with("sync", executor))
    .with_retry_policy(exact_retry(RetryConfig {
        kind_limit: 2,
        ..RetryConfig::default()
    }));

    let ids: Vec<_> = (0..3)
        .map(|_| s.schedule(TaskSpec::new("sync", epoch()).max_retries(5)).unwrap())
        .collect();
    let outcomes = s.on_fire_batch(&ids).await.unwrap();
    let verdicts: Vec<TaskRunOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();
    assert_eq!(
        verdicts,
        vec![
            TaskRunOutcome::Retrying,
            TaskRunOutcome::Retrying,
            TaskRunOutcome::Failed
        ]
    );

    // Once the window has passed, the same kind may retry again.
    clock.advance(chrono::Duration::seconds(61));
    let late = s
        .schedule(TaskSpec::new("sync", clock.now()).max_retries(5))
        .unwrap();
    assert_eq!(s.on_fire(late).await.unwrap(), Some(TaskRunOutcome::Retrying));
}

#[tokio::test]
async fn low_quality_background_work_is_deferred_but_still_runs() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let wake = Arc::new(ManualWakeTimer::new());
    let executor = Arc::new(Switchable::default());
    let s = manual_scheduler(
        Arc::new(MemoryTaskStore::new()),
        clock.clone(),
        wake.clone(),
        registry_with("index", executor.clone()),
    );
    for _ in 0..5 {
        s.quality()
            .record_execution("index", Duration::from_secs(5), 0.1, false);
    }
    assert!(s.quality().should_deprioritize("index"));

    let due = epoch() + chrono::Duration::minutes(1);
    let id = s.schedule(TaskSpec::new("index", due).priority(9)).unwrap();
    let deferred = wake.due_time(id).unwrap();
    assert_eq!(deferred, due + chrono::Duration::seconds(300));

    clock.set(deferred);
    assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Completed));
    assert_eq!(executor.calls(), 1);
}
