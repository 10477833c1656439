//! Alert records and rendering directives.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert importance, most to least insistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    /// Always delivered immediately; escalates until acknowledged.
    Urgent,
    /// Short deferral at most; escalates once.
    High,
    /// Default importance.
    Normal,
    /// Deferred freely and batched when alerts are frequent.
    Low,
}

impl Importance {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Case-insensitive parse of [`as_str`](Self::as_str) names.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "urgent" => Some(Self::Urgent),
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// HIGH and URGENT alerts escalate when left unacknowledged.
    #[must_use]
    pub fn escalates(self) -> bool {
        matches!(self, Self::Urgent | Self::High)
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-facing alert produced by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// How insistently to surface it.
    pub importance: Importance,
}

/// Notification identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

impl NotificationId {
    /// Fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a record is in the delivery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Submitted, no decision applied yet.
    Created,
    /// Deferred; a re-evaluation is pending.
    Delayed,
    /// Handed to the delivery sink.
    Delivered,
    /// Dropped as stale.
    Suppressed,
    /// Withdrawn by a caller.
    Cancelled,
}

impl DeliveryState {
    /// Still waiting for a delivery decision.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Created | Self::Delayed)
    }
}

/// One alert and its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Identifier.
    pub id: NotificationId,
    /// Headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Importance tier.
    pub importance: Importance,
    /// Submission instant.
    pub created_at: DateTime<Utc>,
    /// When the sink accepted it.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Set once the user acknowledges the alert. Never cleared.
    pub user_interacted: bool,
    /// Escalation steps applied so far.
    pub escalation_count: u32,
    /// Delivery state.
    pub state: DeliveryState,
    /// Failed delivery attempts.
    pub failed_attempts: u32,
}

impl NotificationRecord {
    /// New record in [`DeliveryState::Created`].
    #[must_use]
    pub fn from_alert(alert: Alert, created_at: DateTime<Utc>) -> Self {
        Self {
            id: NotificationId::new(),
            title: alert.title,
            message: alert.message,
            importance: alert.importance,
            created_at,
            delivered_at: None,
            user_interacted: false,
            escalation_count: 0,
            state: DeliveryState::Created,
            failed_attempts: 0,
        }
    }

    /// Delivered but not yet acknowledged, with escalation still owed:
    /// URGENT until acknowledged, HIGH until its single step.
    #[must_use]
    pub fn awaiting_acknowledgment(&self) -> bool {
        if self.state != DeliveryState::Delivered || self.user_interacted {
            return false;
        }
        match self.importance {
            Importance::Urgent => true,
            Importance::High => self.escalation_count == 0,
            Importance::Normal | Importance::Low => false,
        }
    }
}

/// Audible cue requested from the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sound {
    /// Alarm tone that cuts through silent modes.
    Alarm,
    /// Platform default notification tone.
    Default,
    /// No sound.
    Silent,
}

/// Indicator light colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LightColor {
    /// Urgent.
    Red,
    /// High.
    Yellow,
    /// Normal.
    Green,
}

/// How intensely the sink should present a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderDirective {
    /// Platform channel / category name.
    pub channel: &'static str,
    /// Importance tier the directive was derived from.
    pub importance: Importance,
    /// Sound cue.
    pub sound: Sound,
    /// Vibration pattern in milliseconds (wait, buzz, wait, buzz, ...).
    /// `None` leaves the platform default in place.
    pub vibration: Option<Vec<u64>>,
    /// Indicator light, if any.
    pub light: Option<LightColor>,
    /// Whether the alert stays until dismissed.
    pub persistent: bool,
    /// Playback volume, 0-100. `None` leaves the device volume alone.
    pub volume_percent: Option<u8>,
}

/// User toggles for importance-driven volume and vibration. Shared between
/// the notification center and the escalation manager; changes apply to the
/// next delivery or escalation step.
#[derive(Debug)]
pub struct RenderPreferences {
    adaptive_volume: AtomicBool,
    adaptive_vibration: AtomicBool,
}

impl RenderPreferences {
    /// Preferences with the given toggles.
    #[must_use]
    pub fn new(adaptive_volume: bool, adaptive_vibration: bool) -> Self {
        Self {
            adaptive_volume: AtomicBool::new(adaptive_volume),
            adaptive_vibration: AtomicBool::new(adaptive_vibration),
        }
    }

    /// Whether volume follows importance.
    #[must_use]
    pub fn adaptive_volume(&self) -> bool {
        self.adaptive_volume.load(Ordering::Relaxed)
    }

    /// Turn importance-driven volume on or off.
    pub fn set_adaptive_volume(&self, enabled: bool) {
        self.adaptive_volume.store(enabled, Ordering::Relaxed);
    }

    /// Whether vibration follows importance.
    #[must_use]
    pub fn adaptive_vibration(&self) -> bool {
        self.adaptive_vibration.load(Ordering::Relaxed)
    }

    /// Turn importance-driven vibration on or off.
    pub fn set_adaptive_vibration(&self, enabled: bool) {
        self.adaptive_vibration.store(enabled, Ordering::Relaxed);
    }
}

impl Default for RenderPreferences {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl RenderDirective {
    /// Presentation for `importance` with the user's adaptive toggles applied.
    #[must_use]
    pub fn adapted(importance: Importance, preferences: &RenderPreferences) -> Self {
        let mut directive = Self::for_importance(importance);
        if !preferences.adaptive_volume() {
            directive.volume_percent = None;
        }
        if !preferences.adaptive_vibration() {
            directive.vibration = None;
        }
        directive
    }

    /// Standard presentation for an importance tier.
    #[must_use]
    pub fn for_importance(importance: Importance) -> Self {
        match importance {
            Importance::Urgent => Self {
                channel: "urgent_notifications",
                importance,
                sound: Sound::Alarm,
                vibration: Some(vec![0, 400, 200, 400, 200, 400, 200, 400]),
                light: Some(LightColor::Red),
                persistent: true,
                volume_percent: Some(100),
            },
            Importance::High => Self {
                channel: "high_priority_notifications",
                importance,
                sound: Sound::Default,
                vibration: Some(vec![0, 300, 150, 300, 150, 300]),
                light: Some(LightColor::Yellow),
                persistent: false,
                volume_percent: Some(75),
            },
            Importance::Normal => Self {
                channel: "normal_notifications",
                importance,
                sound: Sound::Default,
                vibration: Some(vec![0, 250, 250, 250]),
                light: Some(LightColor::Green),
                persistent: false,
                volume_percent: Some(50),
            },
            Importance::Low => Self {
                channel: "low_priority_notifications",
                importance,
                sound: Sound::Silent,
                vibration: Some(vec![0, 100, 100]),
                light: None,
                persistent: false,
                volume_percent: Some(0),
            },
        }
    }
}
