//! Scheduled task records and dispatch outcomes.
//!
//! Defines the persisted [`ScheduledTask`] record, the [`TaskSpec`] used to
//! request a new schedule, and the [`DispatchResult`] protocol executors
//! return.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notifications::Alert;
use crate::scheduler::recurrence::Recurrence;
use crate::scheduler::retry::ErrorKind;

/// Opaque, immutable task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Armed and waiting for its due time.
    Pending,
    /// Claimed by a fire; the executor is running.
    Dispatching,
    /// Finished successfully (one-off tasks only).
    Completed,
    /// Gave up after a permanent failure or an exhausted retry budget.
    Failed,
    /// Cancelled by a caller before it fired.
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are never re-armed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatching => "dispatching",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a storage name produced by [`as_str`](Self::as_str).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "dispatching" => Some(Self::Dispatching),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique identifier, assigned at creation.
    pub id: TaskId,
    /// Executor discriminator and quality bucket.
    pub task_type: String,
    /// Opaque executor payload.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Instant the next attempt is due.
    pub scheduled_time: DateTime<Utc>,
    /// Nominal occurrence the current attempt belongs to.
    ///
    /// Retries and deprioritization push `scheduled_time` forward but leave
    /// this untouched, so recurrence never drifts.
    pub anchor_time: DateTime<Utc>,
    /// Lower is more urgent. Only breaks ties between simultaneously due tasks.
    pub priority: i32,
    /// Repeat rule.
    pub recurrence: Recurrence,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Retries consumed for the current occurrence.
    pub retry_count: u32,
    /// Retry budget per occurrence.
    pub max_retries: u32,
    /// Most recent failure message.
    pub last_error: Option<String>,
    /// When the executor was last invoked.
    pub last_attempt_time: Option<DateTime<Utc>>,
    /// When the task entered a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Monotonic insertion counter, the final tie-break.
    pub sequence: u64,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    /// Returns `true` if the task repeats.
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_recurring()
    }

    /// Dispatch order for a batch of simultaneously due tasks.
    #[must_use]
    pub fn dispatch_key(&self) -> (i32, DateTime<Utc>, u64) {
        (self.priority, self.scheduled_time, self.sequence)
    }
}

/// Request to schedule a new task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub(crate) task_type: String,
    pub(crate) parameters: BTreeMap<String, String>,
    pub(crate) due_at: DateTime<Utc>,
    pub(crate) priority: i32,
    pub(crate) recurrence: Recurrence,
    pub(crate) max_retries: Option<u32>,
}

impl TaskSpec {
    /// A one-off task of `task_type` due at `due_at`, priority 0.
    pub fn new(task_type: impl Into<String>, due_at: DateTime<Utc>) -> Self {
        Self {
            task_type: task_type.into(),
            parameters: BTreeMap::new(),
            due_at,
            priority: 0,
            recurrence: Recurrence::None,
            max_retries: None,
        }
    }

    /// Add one executor parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Replace the parameter map.
    #[must_use]
    pub fn parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the priority (lower is more urgent).
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the repeat rule.
    #[must_use]
    pub fn recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    /// Override the configured retry budget.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Values returned by a successful executor call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    /// Result map. The `confidence` key feeds quality scoring.
    pub values: BTreeMap<String, String>,
    /// User-facing alert produced by the task, if any.
    pub alert: Option<Alert>,
}

impl TaskOutput {
    /// Output carrying only an alert.
    #[must_use]
    pub fn with_alert(alert: Alert) -> Self {
        Self {
            values: BTreeMap::new(),
            alert: Some(alert),
        }
    }

    /// Reported confidence, if present and numeric.
    #[must_use]
    pub fn confidence(&self) -> Option<f64> {
        self.values
            .get("confidence")
            .and_then(|raw| raw.trim().parse::<f64>().ok())
    }
}

/// Outcome of one executor invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    /// The task did its work.
    Success(TaskOutput),
    /// The attempt failed; retry is up to the retry policy.
    Failure {
        /// Classified failure kind.
        kind: ErrorKind,
        /// Diagnostic message.
        message: String,
    },
    /// The task can never succeed; no retry regardless of budget.
    PermanentFailure(String),
}

impl DispatchResult {
    /// Failure with a kind classified from the message text.
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Failure {
            kind: ErrorKind::classify_message(&message),
            message,
        }
    }

    /// Success with an empty result map.
    #[must_use]
    pub fn success() -> Self {
        Self::Success(TaskOutput::default())
    }

    /// Returns `true` for [`DispatchResult::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// What happened to a task after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunOutcome {
    /// One-off task finished.
    Completed,
    /// Recurring task finished and was re-armed for its next occurrence.
    Rescheduled,
    /// Attempt failed and a retry was armed.
    Retrying,
    /// Attempt failed and the task is now terminal.
    Failed,
}

/// One entry in the bounded run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunRecord {
    /// Task that ran.
    pub task_id: TaskId,
    /// Its type.
    pub task_type: String,
    /// When the executor was invoked.
    pub started_at: DateTime<Utc>,
    /// When the outcome was applied.
    pub finished_at: DateTime<Utc>,
    /// What the scheduler did with the result.
    pub outcome: TaskRunOutcome,
    /// Short human-readable summary.
    pub summary: String,
}
