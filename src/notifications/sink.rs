//! Delivery sinks: the platform side that actually shows an alert.
//!
//! Sink calls are synchronous. Escalation steps run under the ledger lock,
//! so implementations should hand off to the OS and return promptly.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::info;

use super::escalation::EscalationStep;
use super::types::{NotificationId, NotificationRecord, RenderDirective};

/// The sink could not present an alert.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Platform adapter that renders alerts.
pub trait DeliverySink: Send + Sync {
    /// Present `record` as described by `directive`.
    fn deliver(
        &self,
        record: &NotificationRecord,
        directive: &RenderDirective,
    ) -> Result<(), DeliveryError>;

    /// Re-present an unacknowledged record more insistently.
    fn escalate(
        &self,
        record: &NotificationRecord,
        step: &EscalationStep,
    ) -> Result<(), DeliveryError>;
}

/// Sink that only writes to the log. Used by the daemon when no platform
/// adapter is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DeliverySink for LogSink {
    fn deliver(
        &self,
        record: &NotificationRecord,
        directive: &RenderDirective,
    ) -> Result<(), DeliveryError> {
        info!(
            id = %record.id,
            importance = %record.importance,
            channel = directive.channel,
            volume = ?directive.volume_percent,
            "ALERT {}: {}",
            record.title,
            record.message
        );
        Ok(())
    }

    fn escalate(
        &self,
        record: &NotificationRecord,
        step: &EscalationStep,
    ) -> Result<(), DeliveryError> {
        info!(
            id = %record.id,
            level = step.level,
            volume = ?step.volume_percent,
            "ESCALATE {}",
            record.title
        );
        Ok(())
    }
}

/// A call observed by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    /// `deliver` succeeded.
    Delivered {
        /// Record id.
        id: NotificationId,
        /// Directive used.
        directive: RenderDirective,
    },
    /// `escalate` succeeded.
    Escalated {
        /// Record id.
        id: NotificationId,
        /// Step applied.
        step: EscalationStep,
    },
}

/// Sink that records calls and can be told to fail, for simulations and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    failures_remaining: AtomicU32,
}

impl RecordingSink {
    /// Sink that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` deliveries.
    pub fn fail_next_deliveries(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Every successful call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Successful deliveries for `id`.
    #[must_use]
    pub fn deliveries_for(&self, id: NotificationId) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Delivered { id: cid, .. } if *cid == id))
            .count()
    }

    /// Escalation steps applied to `id`.
    #[must_use]
    pub fn escalations_for(&self, id: NotificationId) -> Vec<EscalationStep> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Escalated { id: cid, step } if cid == id => Some(step),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: SinkCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

impl DeliverySink for RecordingSink {
    fn deliver(
        &self,
        record: &NotificationRecord,
        directive: &RenderDirective,
    ) -> Result<(), DeliveryError> {
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(DeliveryError("sink rejected delivery".to_owned()));
        }
        self.push(SinkCall::Delivered {
            id: record.id,
            directive: directive.clone(),
        });
        Ok(())
    }

    fn escalate(
        &self,
        record: &NotificationRecord,
        step: &EscalationStep,
    ) -> Result<(), DeliveryError> {
        self.push(SinkCall::Escalated {
            id: record.id,
            step: step.clone(),
        });
        Ok(())
    }
}
