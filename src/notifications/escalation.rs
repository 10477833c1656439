//! Escalation of unacknowledged HIGH and URGENT alerts.
//!
//! After a grace period the alert is re-presented louder with a stronger
//! vibration. URGENT repeats on a fixed period until acknowledged, cancelled,
//! or capped; HIGH escalates once. Every step checks `user_interacted` under
//! the ledger lock and calls the sink before releasing it, so a step never
//! lands after an acknowledgment.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::ledger::NotificationLedger;
use super::sink::DeliverySink;
use super::types::{
    DeliveryState, Importance, NotificationId, RenderDirective, RenderPreferences,
};
use crate::config::EscalationConfig;
use crate::events::{EventBus, VigilEvent};

/// Vibration pattern used for every escalation step.
pub const STRONG_VIBRATION: [u64; 6] = [0, 500, 200, 500, 200, 500];

/// One intensification applied to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationStep {
    /// 1 for the first escalation, 2 for the next, ...
    pub level: u32,
    /// Playback volume, 0-100. `None` when adaptive volume is off.
    pub volume_percent: Option<u8>,
    /// Vibration pattern in milliseconds. `None` when adaptive vibration is off.
    pub vibration: Option<Vec<u64>>,
}

#[derive(Default)]
struct TimerTable {
    next_generation: u64,
    entries: HashMap<NotificationId, (u64, AbortHandle)>,
}

/// Owns escalation timers keyed by notification id.
pub struct EscalationManager {
    config: EscalationConfig,
    ledger: Arc<NotificationLedger>,
    sink: Arc<dyn DeliverySink>,
    preferences: Arc<RenderPreferences>,
    events: EventBus,
    handle: Handle,
    timers: Mutex<TimerTable>,
}

impl EscalationManager {
    /// Create a manager spawning timers onto `handle`.
    pub fn new(
        config: EscalationConfig,
        ledger: Arc<NotificationLedger>,
        sink: Arc<dyn DeliverySink>,
        preferences: Arc<RenderPreferences>,
        events: EventBus,
        handle: Handle,
    ) -> Self {
        Self {
            config,
            ledger,
            sink,
            preferences,
            events,
            handle,
            timers: Mutex::new(TimerTable::default()),
        }
    }

    fn timers(&self) -> MutexGuard<'_, TimerTable> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn grace(&self, importance: Importance) -> Duration {
        match importance {
            Importance::Urgent => Duration::from_secs(self.config.urgent_grace_secs),
            _ => Duration::from_secs(self.config.high_grace_secs),
        }
    }

    /// Arm escalation for a delivered record. Returns `false` for importance
    /// tiers that never escalate. Re-arming replaces an existing timer.
    pub fn start(self: &Arc<Self>, id: NotificationId, importance: Importance) -> bool {
        if !importance.escalates() {
            return false;
        }
        let grace = self.grace(importance);
        let period = Duration::from_secs(self.config.urgent_period_secs.max(1));

        let mut timers = self.timers();
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let manager = Arc::clone(self);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(grace).await;
            loop {
                if !manager.escalate_now(id) || importance != Importance::Urgent {
                    break;
                }
                tokio::time::sleep(period).await;
            }
            manager.finish(id, generation);
        });

        if let Some((_, previous)) = timers
            .entries
            .insert(id, (generation, join.abort_handle()))
        {
            previous.abort();
        }
        debug!(%id, %importance, grace_secs = grace.as_secs(), "escalation armed");
        true
    }

    /// Apply one escalation step now.
    ///
    /// Returns `false` when the record is gone, acknowledged, no longer in
    /// the delivered state, or has used its escalation budget.
    pub fn escalate_now(&self, id: NotificationId) -> bool {
        let mut state = self.ledger.lock();
        let Some(record) = state.get_mut(id) else {
            return false;
        };
        if record.user_interacted || record.state != DeliveryState::Delivered {
            return false;
        }
        let budget = match record.importance {
            Importance::Urgent => self.config.urgent_cap,
            Importance::High => Some(1),
            Importance::Normal | Importance::Low => Some(0),
        };
        if budget.is_some_and(|cap| record.escalation_count >= cap) {
            return false;
        }

        let level = record.escalation_count + 1;
        let volume_percent = self.preferences.adaptive_volume().then(|| {
            let base = RenderDirective::for_importance(record.importance)
                .volume_percent
                .map_or(0, u32::from);
            let volume = base
                .saturating_add(u32::from(self.config.volume_step_percent).saturating_mul(level))
                .min(100);
            u8::try_from(volume).unwrap_or(100)
        });
        let step = EscalationStep {
            level,
            volume_percent,
            vibration: self
                .preferences
                .adaptive_vibration()
                .then(|| STRONG_VIBRATION.to_vec()),
        };

        match self.sink.escalate(record, &step) {
            Ok(()) => {
                record.escalation_count = level;
                drop(state);
                info!(%id, level, volume = ?step.volume_percent, "alert escalated");
                self.events
                    .publish(VigilEvent::NotificationEscalated { id, level });
            }
            Err(e) => {
                drop(state);
                warn!(%id, level, "escalation step failed: {e}");
            }
        }
        true
    }

    /// Stop escalating `id`. Returns `false` if no timer was pending.
    pub fn halt(&self, id: NotificationId) -> bool {
        let removed = self.timers().entries.remove(&id);
        match removed {
            Some((_, abort)) => {
                abort.abort();
                debug!(%id, "escalation halted");
                true
            }
            None => false,
        }
    }

    /// Stop every pending escalation.
    pub fn halt_all(&self) -> usize {
        let drained: Vec<(NotificationId, (u64, AbortHandle))> =
            self.timers().entries.drain().collect();
        for (_, (_, abort)) in &drained {
            abort.abort();
        }
        drained.len()
    }

    /// Whether `id` has a pending escalation timer.
    #[must_use]
    pub fn is_pending(&self, id: NotificationId) -> bool {
        self.timers().entries.contains_key(&id)
    }

    fn finish(&self, id: NotificationId, generation: u64) {
        let mut timers = self.timers();
        if timers
            .entries
            .get(&id)
            .is_some_and(|(current, _)| *current == generation)
        {
            timers.entries.remove(&id);
        }
    }
}
