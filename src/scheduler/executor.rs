//! Task executors and the registry that routes tasks to them by type.
//!
//! The scheduler never performs side effects itself. Each task type maps to
//! one [`TaskExecutor`]; types with no registered executor fail permanently.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::notifications::{Alert, Importance};
use crate::scheduler::tasks::{DispatchResult, TaskOutput};

/// Task type handled by [`NotifyExecutor`].
pub const NOTIFY_TASK_TYPE: &str = "notify";

/// Performs the side effect behind a task type.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one attempt. Must not panic; failures are reported as values.
    async fn execute(&self, task_type: &str, parameters: &BTreeMap<String, String>)
    -> DispatchResult;
}

/// Adapts a synchronous closure into a [`TaskExecutor`].
pub struct FnExecutor<F>(F);

impl<F> FnExecutor<F>
where
    F: Fn(&BTreeMap<String, String>) -> DispatchResult + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> TaskExecutor for FnExecutor<F>
where
    F: Fn(&BTreeMap<String, String>) -> DispatchResult + Send + Sync,
{
    async fn execute(
        &self,
        _task_type: &str,
        parameters: &BTreeMap<String, String>,
    ) -> DispatchResult {
        (self.0)(parameters)
    }
}

/// Turns `title` / `message` / `importance` parameters into a user alert.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyExecutor;

#[async_trait]
impl TaskExecutor for NotifyExecutor {
    async fn execute(
        &self,
        _task_type: &str,
        parameters: &BTreeMap<String, String>,
    ) -> DispatchResult {
        let Some(title) = parameters.get("title").filter(|t| !t.trim().is_empty()) else {
            return DispatchResult::PermanentFailure("notify task needs a title".to_owned());
        };
        let importance = match parameters.get("importance") {
            None => Importance::Normal,
            Some(raw) => match Importance::parse(raw) {
                Some(importance) => importance,
                None => {
                    return DispatchResult::PermanentFailure(format!(
                        "unknown importance '{raw}'"
                    ));
                }
            },
        };
        let message = parameters.get("message").cloned().unwrap_or_default();

        DispatchResult::Success(TaskOutput::with_alert(Alert {
            title: title.clone(),
            message,
            importance,
        }))
    }
}

/// Executors keyed by task type.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with built-in executors (`notify`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(NOTIFY_TASK_TYPE, Arc::new(NotifyExecutor));
        registry
    }

    /// Register (or replace) the executor for `task_type`.
    pub fn register(&mut self, task_type: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        let task_type = task_type.into();
        if self.executors.insert(task_type.clone(), executor).is_some() {
            warn!(task_type, "replacing registered executor");
        }
    }

    /// Whether an executor exists for `task_type`.
    #[must_use]
    pub fn contains(&self, task_type: &str) -> bool {
        self.executors.contains_key(task_type)
    }

    /// Registered task types, sorted.
    #[must_use]
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Route one attempt to the executor for `task_type`.
    pub async fn dispatch(
        &self,
        task_type: &str,
        parameters: &BTreeMap<String, String>,
    ) -> DispatchResult {
        match self.executors.get(task_type) {
            Some(executor) => {
                debug!(task_type, "dispatching to executor");
                executor.execute(task_type, parameters).await
            }
            None => DispatchResult::PermanentFailure(format!(
                "no executor registered for task type '{task_type}'"
            )),
        }
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}
