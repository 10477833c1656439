//! Persistent task scheduling.
//!
//! [`TaskScheduler`] owns the task lifecycle: it persists tasks through a
//! [`TaskStore`](crate::store::TaskStore), arms a [`WakeTimer`] per pending
//! task, routes fired tasks to executors, and applies the retry policy and
//! recurrence rules to the result. [`SchedulerRunner`] connects a tokio wake
//! timer to the scheduler in a background loop.

pub mod engine;
pub mod executor;
pub mod recurrence;
pub mod retry;
pub mod runner;
pub mod tasks;
pub mod wake;

pub use engine::{RecoveryReport, TaskScheduler};
pub use executor::{ExecutorRegistry, FnExecutor, NOTIFY_TASK_TYPE, NotifyExecutor, TaskExecutor};
pub use recurrence::{CalendarPattern, Recurrence};
pub use retry::{ErrorKind, RetryPolicy, RetryVerdict};
pub use runner::SchedulerRunner;
pub use tasks::{
    DispatchResult, ScheduledTask, TaskId, TaskOutput, TaskRunOutcome, TaskRunRecord, TaskSpec,
    TaskStatus,
};
pub use wake::{ManualWakeTimer, TokioWakeTimer, WakeTimer};
