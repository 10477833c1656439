//! Context-aware alert delivery.
//!
//! - [`policy`]: deliver-now / delay / suppress decisions
//! - [`center`]: record lifecycle, deferral timers, delivery retries
//! - [`escalation`]: repeated intensification of unacknowledged alerts
//! - [`context`]: device/user context snapshots
//! - [`sink`]: platform delivery adapters

pub mod center;
pub mod context;
pub mod escalation;
pub mod ledger;
pub mod policy;
pub mod sink;
pub mod types;

pub use center::NotificationCenter;
pub use context::{AlertLog, ContextProvider, ContextSnapshot, DeviceContext, StaticContext};
pub use escalation::{EscalationManager, EscalationStep};
pub use policy::{Decision, NotificationPolicyEngine};
pub use sink::{DeliveryError, DeliverySink, LogSink, RecordingSink};
pub use types::{
    Alert, DeliveryState, Importance, NotificationId, NotificationRecord, RenderDirective,
    RenderPreferences,
};
