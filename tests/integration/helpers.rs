//! Shared helpers for integration tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use vigil::clock::ManualClock;
use vigil::config::{RetryConfig, SchedulerConfig};
use vigil::scheduler::{
    DispatchResult, ExecutorRegistry, ManualWakeTimer, RetryPolicy, TaskExecutor, TaskScheduler,
};
use vigil::store::TaskStore;

/// Fixed test epoch, a weekday at noon UTC.
pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 12, 12, 0, 0).unwrap()
}

/// Retry policy without jitter so due times are exact.
pub(crate) fn exact_retry(config: RetryConfig) -> RetryPolicy {
    RetryPolicy::new(&RetryConfig {
        jitter_ratio: 0.0,
        ..config
    })
}

/// Scheduler over `store` with a manual wake timer and clock.
pub(crate) fn manual_scheduler(
    store: Arc<dyn TaskStore>,
    clock: Arc<ManualClock>,
    wake: Arc<ManualWakeTimer>,
    executors: ExecutorRegistry,
) -> TaskScheduler {
    TaskScheduler::new(SchedulerConfig::default(), store, wake, clock)
        .expect("scheduler")
        .with_executors(executors)
        .with_retry_policy(exact_retry(RetryConfig::default()))
}

/// Executor that succeeds or fails with a network error on demand.
#[derive(Debug, Default)]
pub(crate) struct Switchable {
    pub(crate) failing: AtomicBool,
    pub(crate) calls: AtomicUsize,
}

impl Switchable {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for Switchable {
    async fn execute(&self, _: &str, _: &BTreeMap<String, String>) -> DispatchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            DispatchResult::failure("network unreachable")
        } else {
            DispatchResult::success()
        }
    }
}

/// Registry routing `task_type` to `executor`.
pub(crate) fn registry_with(task_type: &str, executor: Arc<dyn TaskExecutor>) -> ExecutorRegistry {
    let mut executors = ExecutorRegistry::new();
    executors.register(task_type, executor);
    executors
}
