//! Delivery policy: deliver now, delay, or suppress.
//!
//! URGENT always goes out immediately. Other tiers are deferred while the
//! user is in a call, inside quiet hours, or in do-not-disturb; when several
//! apply, the longest delay wins. Deferred records are re-evaluated against
//! fresh context rather than delivered blindly.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::context::ContextSnapshot;
use super::types::{Importance, NotificationRecord};
use crate::config::{DelayTier, NotificationConfig};

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Hand to the sink now.
    DeliverNow,
    /// Re-evaluate after the given duration.
    Delay(Duration),
    /// Drop without delivering.
    Suppress,
}

/// Why a delivery was deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// Call in progress.
    InCall,
    /// Inside the quiet-hours window.
    QuietHours,
    /// Do-not-disturb engaged.
    DoNotDisturb,
}

/// Stateless decision function over importance and context.
#[derive(Debug, Clone)]
pub struct NotificationPolicyEngine {
    config: NotificationConfig,
}

impl NotificationPolicyEngine {
    /// Build from configuration.
    #[must_use]
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    /// Window used for `recent_alert_count` snapshots.
    #[must_use]
    pub fn batch_window(&self) -> Duration {
        Duration::from_secs(self.config.batch_window_secs)
    }

    /// Whether `hour` falls in the quiet window. Wraps past midnight when
    /// start > end; an empty window when start == end.
    #[must_use]
    pub fn is_quiet_hour(&self, hour: u8) -> bool {
        let (start, end) = (self.config.quiet_start_hour, self.config.quiet_end_hour);
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    /// Conditions in `ctx` that defer non-urgent alerts.
    #[must_use]
    pub fn defer_reasons(&self, ctx: &ContextSnapshot) -> Vec<DeferReason> {
        let mut reasons = Vec::new();
        if ctx.in_call {
            reasons.push(DeferReason::InCall);
        }
        if self.is_quiet_hour(ctx.local_hour) {
            reasons.push(DeferReason::QuietHours);
        }
        if ctx.do_not_disturb && self.config.respect_do_not_disturb {
            reasons.push(DeferReason::DoNotDisturb);
        }
        reasons
    }

    fn tier(&self, reason: DeferReason) -> DelayTier {
        match reason {
            DeferReason::InCall => self.config.in_call_delay,
            DeferReason::QuietHours => self.config.quiet_hours_delay,
            DeferReason::DoNotDisturb => self.config.do_not_disturb_delay,
        }
    }

    /// Decide for an alert of `importance` under `ctx`.
    #[must_use]
    pub fn decide(&self, importance: Importance, ctx: &ContextSnapshot) -> Decision {
        if importance == Importance::Urgent || !self.config.smart_timing_enabled {
            return Decision::DeliverNow;
        }

        let longest = self
            .defer_reasons(ctx)
            .into_iter()
            .map(|reason| {
                let tier = self.tier(reason);
                match importance {
                    Importance::High => tier.high_secs,
                    Importance::Normal => tier.normal_secs,
                    Importance::Low | Importance::Urgent => tier.low_secs,
                }
            })
            .max();

        let Some(mut secs) = longest else {
            return Decision::DeliverNow;
        };
        if importance == Importance::Low && ctx.recent_alert_count > self.config.batch_threshold {
            secs = secs.saturating_add(self.config.batch_extension_secs);
        }
        Decision::Delay(Duration::from_secs(secs))
    }

    /// Decide for a concrete record, suppressing LOW/NORMAL alerts that have
    /// gone stale while deferred.
    #[must_use]
    pub fn decide_for(
        &self,
        record: &NotificationRecord,
        ctx: &ContextSnapshot,
        now: DateTime<Utc>,
    ) -> Decision {
        let stale_after = match record.importance {
            Importance::Low => Some(self.config.low_stale_after_secs),
            Importance::Normal => Some(self.config.normal_stale_after_secs),
            Importance::High | Importance::Urgent => None,
        };
        if let Some(limit) = stale_after {
            let age = (now - record.created_at).num_seconds();
            if age >= 0 && age.unsigned_abs() >= limit {
                return Decision::Suppress;
            }
        }
        self.decide(record.importance, ctx)
    }
}
