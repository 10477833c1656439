//! Cancel racing with fire, across threads and store backends.

use std::sync::{Arc, Barrier};
use std::thread;

use vigil::clock::ManualClock;
use vigil::scheduler::{
    DispatchResult, ExecutorRegistry, FnExecutor, ManualWakeTimer, TaskRunOutcome, TaskScheduler,
    TaskSpec, TaskStatus, WakeTimer,
};
use vigil::store::{MemoryTaskStore, SqliteTaskStore, TaskStore};

use crate::helpers::{epoch, manual_scheduler};

fn race(store: Arc<dyn TaskStore>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let wake = Arc::new(ManualWakeTimer::new());
    let s: Arc<TaskScheduler> = Arc::new(manual_scheduler(
        store,
        clock,
        wake.clone(),
        ExecutorRegistry::new(),
    ));

    let ids: Vec<_> = (0..100)
        .map(|_| s.schedule(TaskSpec::new("check", epoch())).unwrap())
        .collect();
    let barrier = Arc::new(Barrier::new(2));

    let canceller = {
        let (s, ids, barrier) = (Arc::clone(&s), ids.clone(), Arc::clone(&barrier));
        thread::spawn(move || {
            barrier.wait();
            ids.iter().map(|id| s.cancel(*id).unwrap()).collect::<Vec<bool>>()
        })
    };
    let firer = {
        let (s, ids, barrier) = (Arc::clone(&s), ids.clone(), Arc::clone(&barrier));
        thread::spawn(move || {
            barrier.wait();
            ids.iter()
                .rev()
                .map(|id| s.claim(*id).unwrap().is_some())
                .collect::<Vec<bool>>()
        })
    };

    let cancelled = canceller.join().unwrap();
    let mut claimed = firer.join().unwrap();
    claimed.reverse();

    for (i, id) in ids.iter().enumerate() {
        assert_ne!(cancelled[i], claimed[i], "exactly one side must win for {id}");
        let status = s.get(*id).unwrap().unwrap().status;
        assert!(!wake.is_armed(*id));
        if cancelled[i] {
            assert_eq!(status, TaskStatus::Cancelled);
        } else {
            assert_eq!(status, TaskStatus::Dispatching);
        }
    }
}

#[test]
fn cancel_and_fire_never_both_win_in_memory() {
    race(Arc::new(MemoryTaskStore::new()));
}

#[test]
fn cancel_and_fire_never_both_win_in_sqlite() {
    race(Arc::new(SqliteTaskStore::open_in_memory().unwrap()));
}

#[tokio::test]
async fn cancel_after_natural_fire_is_a_quiet_no_op() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let wake = Arc::new(ManualWakeTimer::new());
    let mut executors = ExecutorRegistry::new();
    executors.register(
        "check",
        Arc::new(FnExecutor::new(|_: &std::collections::BTreeMap<String, String>| {
            DispatchResult::success()
        })),
    );
    let s = manual_scheduler(
        Arc::new(MemoryTaskStore::new()),
        clock,
        wake.clone(),
        executors,
    );

    let id = s.schedule(TaskSpec::new("check", epoch())).unwrap();
    let fired = wake.take_due(epoch());
    assert_eq!(fired, vec![id]);
    assert_eq!(s.on_fire(id).await.unwrap(), Some(TaskRunOutcome::Completed));

    assert!(!s.cancel(id).unwrap());
    assert!(!s.cancel(id).unwrap());
    assert_eq!(wake.armed_count(), 0);
    assert_eq!(s.get(id).unwrap().unwrap().status, TaskStatus::Completed);
}
