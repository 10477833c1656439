//! Notification center: applies the delivery policy to submitted alerts.
//!
//! Each record gets one pending follow-up timer at most. A follow-up re-runs
//! the policy against fresh context, so a deferral during a call keeps
//! deferring until the call ends. Failed deliveries are retried on a short
//! fixed interval up to a bounded number of attempts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::context::{AlertLog, ContextProvider};
use super::escalation::EscalationManager;
use super::ledger::NotificationLedger;
use super::policy::{Decision, NotificationPolicyEngine};
use super::sink::DeliverySink;
use super::types::{
    Alert, DeliveryState, Importance, NotificationId, NotificationRecord, RenderDirective,
    RenderPreferences,
};
use crate::clock::Clock;
use crate::config::{EscalationConfig, NotificationConfig};
use crate::error::{Result, VigilError};
use crate::events::{EventBus, VigilEvent};

#[derive(Default)]
struct FollowUps {
    next_generation: u64,
    entries: HashMap<NotificationId, (u64, AbortHandle)>,
}

/// Accepts alerts and decides whether, when, and how insistently to show them.
pub struct NotificationCenter {
    config: NotificationConfig,
    policy: NotificationPolicyEngine,
    context: Arc<dyn ContextProvider>,
    alert_log: Arc<AlertLog>,
    ledger: Arc<NotificationLedger>,
    sink: Arc<dyn DeliverySink>,
    preferences: Arc<RenderPreferences>,
    escalation: Arc<EscalationManager>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    handle: Handle,
    follow_ups: Mutex<FollowUps>,
}

impl NotificationCenter {
    /// Build a center on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub fn new(
        config: NotificationConfig,
        escalation: EscalationConfig,
        context: Arc<dyn ContextProvider>,
        alert_log: Arc<AlertLog>,
        sink: Arc<dyn DeliverySink>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Result<Arc<Self>> {
        let handle = Handle::try_current().map_err(|e| {
            VigilError::Notification(format!("notification center needs a tokio runtime: {e}"))
        })?;
        let ledger = Arc::new(NotificationLedger::new(config.history_limit));
        let preferences = Arc::new(RenderPreferences::new(
            config.adaptive_volume,
            config.adaptive_vibration,
        ));
        let escalation = Arc::new(EscalationManager::new(
            escalation,
            Arc::clone(&ledger),
            Arc::clone(&sink),
            Arc::clone(&preferences),
            events.clone(),
            handle.clone(),
        ));
        Ok(Arc::new(Self {
            policy: NotificationPolicyEngine::new(config.clone()),
            config,
            context,
            alert_log,
            ledger,
            sink,
            preferences,
            escalation,
            events,
            clock,
            handle,
            follow_ups: Mutex::new(FollowUps::default()),
        }))
    }

    fn follow_ups(&self) -> MutexGuard<'_, FollowUps> {
        self.follow_ups.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a new alert and apply the policy to it.
    pub fn submit(self: &Arc<Self>, alert: Alert) -> NotificationId {
        let record = NotificationRecord::from_alert(alert, self.clock.now());
        let id = record.id;
        debug!(%id, importance = %record.importance, title = %record.title, "alert submitted");
        self.ledger.insert(record);
        self.evaluate(id);
        id
    }

    fn evaluate(self: &Arc<Self>, id: NotificationId) {
        let Some(record) = self.ledger.get(id) else {
            return;
        };
        if !record.state.is_pending() {
            return;
        }

        let ctx = self.context.snapshot(self.policy.batch_window());
        match self.policy.decide_for(&record, &ctx, self.clock.now()) {
            Decision::DeliverNow => self.deliver(id),
            Decision::Delay(delay) => {
                self.ledger.update(id, |r| {
                    if r.state.is_pending() {
                        r.state = DeliveryState::Delayed;
                    }
                });
                debug!(
                    %id,
                    importance = %record.importance,
                    delay_secs = delay.as_secs(),
                    in_call = ctx.in_call,
                    dnd = ctx.do_not_disturb,
                    hour = ctx.local_hour,
                    "alert deferred"
                );
                self.events
                    .publish(VigilEvent::NotificationDelayed { id, delay });
                self.schedule_follow_up(id, delay);
            }
            Decision::Suppress => {
                self.ledger
                    .update(id, |r| r.state = DeliveryState::Suppressed);
                info!(%id, importance = %record.importance, "stale alert suppressed");
                self.events
                    .publish(VigilEvent::NotificationSuppressed { id });
            }
        }
    }

    fn deliver(self: &Arc<Self>, id: NotificationId) {
        let Some(record) = self.ledger.get(id) else {
            return;
        };
        let directive = RenderDirective::adapted(record.importance, &self.preferences);

        match self.sink.deliver(&record, &directive) {
            Ok(()) => {
                let now = self.clock.now();
                let escalate = self
                    .ledger
                    .update(id, |r| {
                        r.delivered_at = Some(now);
                        if r.state.is_pending() {
                            r.state = DeliveryState::Delivered;
                        }
                        r.state == DeliveryState::Delivered
                            && !r.user_interacted
                            && r.importance.escalates()
                    })
                    .unwrap_or(false);
                self.alert_log.record(now);
                info!(%id, importance = %record.importance, channel = directive.channel, "alert delivered");
                self.events.publish(VigilEvent::NotificationDelivered {
                    id,
                    importance: record.importance,
                });
                if escalate {
                    self.escalation.start(id, record.importance);
                }
            }
            Err(e) => {
                let attempts = self
                    .ledger
                    .update(id, |r| {
                        r.failed_attempts += 1;
                        r.failed_attempts
                    })
                    .unwrap_or(u32::MAX);
                if record.importance == Importance::Urgent {
                    error!(%id, attempts, "urgent alert delivery failed: {e}");
                } else {
                    warn!(%id, importance = %record.importance, attempts, "alert delivery failed: {e}");
                }
                self.events.publish(VigilEvent::NotificationDeliveryFailed {
                    id,
                    importance: record.importance,
                    error: e.to_string(),
                });

                if attempts < self.config.urgent_redelivery_attempts {
                    self.schedule_follow_up(
                        id,
                        Duration::from_secs(self.config.urgent_redelivery_secs),
                    );
                } else {
                    error!(%id, attempts, "giving up on alert delivery");
                }
            }
        }
    }

    fn schedule_follow_up(self: &Arc<Self>, id: NotificationId, delay: Duration) {
        let mut follow_ups = self.follow_ups();
        follow_ups.next_generation += 1;
        let generation = follow_ups.next_generation;

        let center = Arc::clone(self);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut follow_ups = center.follow_ups();
                if follow_ups
                    .entries
                    .get(&id)
                    .is_some_and(|(current, _)| *current == generation)
                {
                    follow_ups.entries.remove(&id);
                }
            }
            center.evaluate(id);
        });

        if let Some((_, previous)) = follow_ups
            .entries
            .insert(id, (generation, join.abort_handle()))
        {
            previous.abort();
        }
    }

    fn abort_follow_up(&self, id: NotificationId) {
        if let Some((_, abort)) = self.follow_ups().entries.remove(&id) {
            abort.abort();
        }
    }

    /// Record that the user acknowledged `id` and halt its escalation.
    ///
    /// The flag is set under the ledger lock before any timer is touched, so
    /// an escalation step that is already due observes it and skips.
    /// Returns `false` for unknown ids.
    pub fn mark_interacted(&self, id: NotificationId) -> bool {
        let Some(first) = self.ledger.update(id, |r| {
            let first = !r.user_interacted;
            r.user_interacted = true;
            first
        }) else {
            return false;
        };
        self.escalation.halt(id);
        if first {
            info!(%id, "alert acknowledged");
            self.events
                .publish(VigilEvent::NotificationInteracted { id });
        }
        true
    }

    /// Withdraw `id`: no further delivery, re-evaluation, or escalation.
    /// Returns `false` if it was unknown, suppressed, or already cancelled.
    pub fn cancel(&self, id: NotificationId) -> bool {
        let changed = self
            .ledger
            .update(id, |r| match r.state {
                DeliveryState::Created | DeliveryState::Delayed | DeliveryState::Delivered => {
                    r.state = DeliveryState::Cancelled;
                    true
                }
                DeliveryState::Suppressed | DeliveryState::Cancelled => false,
            })
            .unwrap_or(false);
        if changed {
            self.abort_follow_up(id);
            self.escalation.halt(id);
            debug!(%id, "alert cancelled");
        }
        changed
    }

    /// Cancel every live record. Returns how many changed.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<NotificationId> = self.ledger.lock().ids().collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Up to `limit` records, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<NotificationRecord> {
        self.ledger.recent(limit)
    }

    /// Snapshot of one record.
    #[must_use]
    pub fn get(&self, id: NotificationId) -> Option<NotificationRecord> {
        self.ledger.get(id)
    }

    /// Whether `id` still has an escalation timer.
    #[must_use]
    pub fn escalation_pending(&self, id: NotificationId) -> bool {
        self.escalation.is_pending(id)
    }

    /// Live volume and vibration toggles.
    #[must_use]
    pub fn preferences(&self) -> &RenderPreferences {
        &self.preferences
    }

    /// Turn importance-driven volume on or off for later deliveries and escalations.
    pub fn set_adaptive_volume(&self, enabled: bool) {
        self.preferences.set_adaptive_volume(enabled);
        info!(enabled, "adaptive volume updated");
    }

    /// Turn importance-driven vibration on or off for later deliveries and escalations.
    pub fn set_adaptive_vibration(&self, enabled: bool) {
        self.preferences.set_adaptive_vibration(enabled);
        info!(enabled, "adaptive vibration updated");
    }
}
