//! Restart recovery over a SQLite store.

use std::sync::Arc;
use std::time::Duration;

use vigil::clock::{Clock, ManualClock};
use vigil::config::SchedulerConfig;
use vigil::scheduler::{
    ExecutorRegistry, ManualWakeTimer, Recurrence, TaskScheduler, TaskSpec, TaskStatus,
    TokioWakeTimer, WakeTimer,
};
use vigil::store::{SqliteTaskStore, TaskStore};

use crate::helpers::{epoch, manual_scheduler};

#[tokio::test]
async fn restart_rearms_every_pending_task() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    let clock = Arc::new(ManualClock::new(epoch()));

    let mut pending = Vec::new();
    {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open(&path).unwrap());
        let wake = Arc::new(ManualWakeTimer::new());
        let s = manual_scheduler(store, clock.clone(), wake, ExecutorRegistry::new());
        for minutes in [1, 5, 30, 120, 600] {
            pending.push(
                s.schedule(TaskSpec::new("check", epoch() + chrono::Duration::minutes(minutes)))
                    .unwrap(),
            );
        }
        pending.push(
            s.schedule(
                TaskSpec::new("digest", epoch() + chrono::Duration::minutes(2))
                    .recurrence(Recurrence::daily(9, 0)),
            )
            .unwrap(),
        );
        let cancelled = s
            .schedule(TaskSpec::new("check", epoch() + chrono::Duration::minutes(3)))
            .unwrap();
        s.cancel(cancelled).unwrap();
    }

    // Process was down for ten minutes.
    clock.advance(chrono::Duration::minutes(10));

    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open(&path).unwrap());
    let wake = Arc::new(ManualWakeTimer::new());
    let s = manual_scheduler(store, clock.clone(), wake.clone(), ExecutorRegistry::new());
    let report = s.recover().unwrap();

    assert_eq!(report.rearmed, pending.len());
    assert_eq!(report.overdue, 3);
    assert_eq!(report.reclaimed, 0);
    assert_eq!(wake.armed_count(), pending.len());
    for id in &pending {
        assert!(wake.is_armed(*id));
    }
    assert_eq!(s.list(Some(TaskStatus::Cancelled)).unwrap().len(), 1);
}

#[tokio::test]
async fn overdue_tasks_fire_immediately_after_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    let clock = Arc::new(ManualClock::new(epoch()));

    let id = {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open(&path).unwrap());
        let s = manual_scheduler(
            store,
            clock.clone(),
            Arc::new(ManualWakeTimer::new()),
            ExecutorRegistry::new(),
        );
        s.schedule(TaskSpec::new("check", epoch() + chrono::Duration::minutes(1)))
            .unwrap()
    };
    clock.advance(chrono::Duration::hours(1));

    let (wake, mut fired) = TokioWakeTimer::on_current_runtime(clock.clone()).unwrap();
    let s = TaskScheduler::new(
        SchedulerConfig::default(),
        Arc::new(SqliteTaskStore::open(&path).unwrap()),
        Arc::new(wake),
        clock.clone(),
    )
    .unwrap();
    s.recover().unwrap();

    let got = tokio::time::timeout(Duration::from_secs(2), fired.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, id);
    assert!(s.claim(id).unwrap().is_some());
    assert!(clock.now() > epoch());
}

#[tokio::test]
async fn crash_mid_dispatch_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    let clock = Arc::new(ManualClock::new(epoch()));

    let id = {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open(&path).unwrap());
        let s = manual_scheduler(
            store,
            clock.clone(),
            Arc::new(ManualWakeTimer::new()),
            ExecutorRegistry::new(),
        );
        let id = s.schedule(TaskSpec::new("check", epoch())).unwrap();
        s.claim(id).unwrap().unwrap();
        id
    };

    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open(&path).unwrap());
    let wake = Arc::new(ManualWakeTimer::new());
    let s = manual_scheduler(store, clock, wake.clone(), ExecutorRegistry::new());
    let report = s.recover().unwrap();
    assert_eq!(report.reclaimed, 1);
    assert_eq!(report.rearmed, 1);
    assert_eq!(s.get(id).unwrap().unwrap().status, TaskStatus::Pending);
    assert!(wake.is_armed(id));
}
