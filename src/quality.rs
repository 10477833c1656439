//! Rolling per-task-type execution quality.
//!
//! Each task type accumulates success, latency, and confidence totals. The
//! derived score feeds scheduling: types below the threshold start later
//! and get a tighter retry window, but are never blocked outright.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::QualityConfig;

/// Aggregates for one task type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QualityRecord {
    /// Attempts recorded.
    pub total_executions: u64,
    /// Attempts that succeeded.
    pub successful_executions: u64,
    /// Sum of attempt latencies in milliseconds.
    pub total_latency_ms: u64,
    /// Sum of clamped confidence values.
    pub total_confidence: f64,
}

impl QualityRecord {
    /// Fraction of successful attempts.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.successful_executions as f64 / self.total_executions as f64
    }

    /// Mean confidence.
    #[must_use]
    pub fn avg_confidence(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.total_confidence / self.total_executions as f64
    }

    /// Mean latency.
    #[must_use]
    pub fn avg_latency(&self) -> Duration {
        if self.total_executions == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.total_latency_ms / self.total_executions)
    }

    /// Step score for the mean latency.
    #[must_use]
    pub fn latency_score(&self) -> f64 {
        match self.avg_latency().as_millis() {
            0..100 => 1.0,
            100..500 => 0.8,
            500..1000 => 0.6,
            1000..2000 => 0.4,
            _ => 0.2,
        }
    }

    /// `0.5·success_rate + 0.3·avg_confidence + 0.2·latency_score`, in `[0, 1]`.
    #[must_use]
    pub fn quality_score(&self) -> f64 {
        let score = 0.5 * self.success_rate()
            + 0.3 * self.avg_confidence()
            + 0.2 * self.latency_score();
        score.clamp(0.0, 1.0)
    }
}

/// Shared quality tracker, one record per task type.
#[derive(Debug)]
pub struct QualityFeedback {
    threshold: f64,
    records: Mutex<HashMap<String, QualityRecord>>,
}

impl QualityFeedback {
    /// Create a tracker with the configured deprioritization threshold.
    #[must_use]
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            threshold: config.deprioritize_threshold,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, QualityRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one attempt. Confidence outside `[0, 1]` is clamped; NaN counts as 0.
    pub fn record_execution(
        &self,
        task_type: &str,
        latency: Duration,
        confidence: f64,
        success: bool,
    ) {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);

        let mut records = self.lock();
        let record = records.entry(task_type.to_owned()).or_default();
        record.total_executions += 1;
        if success {
            record.successful_executions += 1;
        }
        record.total_latency_ms = record.total_latency_ms.saturating_add(latency_ms);
        record.total_confidence += confidence;
        debug!(
            task_type,
            success,
            latency_ms,
            score = record.quality_score(),
            "quality recorded"
        );
    }

    /// Current score, or `None` before the first attempt.
    #[must_use]
    pub fn quality_score(&self, task_type: &str) -> Option<f64> {
        self.lock().get(task_type).map(QualityRecord::quality_score)
    }

    /// Whether new work of this type should be de-emphasized.
    ///
    /// Unknown types are never deprioritized.
    #[must_use]
    pub fn should_deprioritize(&self, task_type: &str) -> bool {
        self.quality_score(task_type)
            .is_some_and(|score| score < self.threshold)
    }

    /// Operator reset for one type. Returns `false` if it had no record.
    pub fn reset(&self, task_type: &str) -> bool {
        let removed = self.lock().remove(task_type).is_some();
        if removed {
            info!(task_type, "quality record reset");
        }
        removed
    }

    /// Copy of every record, sorted by task type.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, QualityRecord)> {
        let mut out: Vec<(String, QualityRecord)> = self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
