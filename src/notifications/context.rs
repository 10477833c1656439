//! Device and user context consulted by the delivery policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};

use crate::clock::Clock;

/// Deliveries remembered by [`AlertLog`]. Older entries are dropped.
const ALERT_LOG_CAPACITY: usize = 1024;

/// Point-in-time view of the user's situation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextSnapshot {
    /// A phone or video call is active.
    pub in_call: bool,
    /// Do-not-disturb is engaged.
    pub do_not_disturb: bool,
    /// Device-local hour of day (0-23).
    pub local_hour: u8,
    /// Alerts delivered within the requested window.
    pub recent_alert_count: u32,
}

/// Read-only source of [`ContextSnapshot`]s. Must be cheap and side-effect free.
pub trait ContextProvider: Send + Sync {
    /// Snapshot with `recent_alert_count` counted over `alert_window`.
    fn snapshot(&self, alert_window: Duration) -> ContextSnapshot;
}

/// Timestamps of recent deliveries, shared between the notification center
/// (writer) and context providers (readers).
#[derive(Debug, Default)]
pub struct AlertLog {
    deliveries: Mutex<VecDeque<DateTime<Utc>>>,
}

impl AlertLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one delivery.
    pub fn record(&self, at: DateTime<Utc>) {
        let mut deliveries = self.deliveries.lock().unwrap_or_else(|e| e.into_inner());
        deliveries.push_back(at);
        while deliveries.len() > ALERT_LOG_CAPACITY {
            deliveries.pop_front();
        }
    }

    /// Deliveries strictly after `cutoff`.
    #[must_use]
    pub fn count_since(&self, cutoff: DateTime<Utc>) -> u32 {
        let deliveries = self.deliveries.lock().unwrap_or_else(|e| e.into_inner());
        let count = deliveries.iter().filter(|at| **at > cutoff).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

/// Context provider fed by platform adapters.
///
/// Call and do-not-disturb state are pushed in by whatever watches the OS.
/// Local hour derives from the clock plus a UTC offset.
pub struct DeviceContext {
    clock: Arc<dyn Clock>,
    log: Arc<AlertLog>,
    in_call: AtomicBool,
    do_not_disturb: AtomicBool,
    utc_offset_minutes: AtomicI32,
}

impl DeviceContext {
    /// Context with no call, no DND, and UTC local time.
    pub fn new(clock: Arc<dyn Clock>, log: Arc<AlertLog>) -> Self {
        Self {
            clock,
            log,
            in_call: AtomicBool::new(false),
            do_not_disturb: AtomicBool::new(false),
            utc_offset_minutes: AtomicI32::new(0),
        }
    }

    /// Report call start/end.
    pub fn set_in_call(&self, active: bool) {
        self.in_call.store(active, Ordering::SeqCst);
    }

    /// Report do-not-disturb changes.
    pub fn set_do_not_disturb(&self, engaged: bool) {
        self.do_not_disturb.store(engaged, Ordering::SeqCst);
    }

    /// Set the device's offset from UTC.
    pub fn set_utc_offset_minutes(&self, minutes: i32) {
        self.utc_offset_minutes.store(minutes, Ordering::SeqCst);
    }
}

impl ContextProvider for DeviceContext {
    fn snapshot(&self, alert_window: Duration) -> ContextSnapshot {
        let now = self.clock.now();
        let offset = chrono::Duration::minutes(i64::from(
            self.utc_offset_minutes.load(Ordering::SeqCst),
        ));
        let window = chrono::Duration::from_std(alert_window).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

        ContextSnapshot {
            in_call: self.in_call.load(Ordering::SeqCst),
            do_not_disturb: self.do_not_disturb.load(Ordering::SeqCst),
            local_hour: u8::try_from((now + offset).hour()).unwrap_or(0),
            recent_alert_count: self.log.count_since(cutoff),
        }
    }
}

/// Provider that always returns the same snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticContext(pub ContextSnapshot);

impl ContextProvider for StaticContext {
    fn snapshot(&self, _alert_window: Duration) -> ContextSnapshot {
        self.0
    }
}
