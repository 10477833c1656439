//! Vigil: reliable deferred task execution with context-aware alert delivery.
//!
//! # Architecture
//!
//! - **Scheduler**: persists one-off and recurring tasks, arms a wake timer
//!   per pending task, dispatches due tasks to executors, retries transient
//!   failures with bounded backoff
//! - **Store**: SQLite (or in-memory) task persistence with compare-and-swap
//!   status transitions, re-armed on restart
//! - **Quality**: per-task-type success/latency/confidence scoring that
//!   de-emphasizes unreliable background work
//! - **Notifications**: decides whether an alert is shown now, later, or not
//!   at all, and escalates unacknowledged important alerts
//!
//! [`runtime::Vigil`] wires the pieces together from a [`config::VigilConfig`].

pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod notifications;
pub mod quality;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod vigil_dirs;

pub use config::VigilConfig;
pub use error::{Result, ScheduleError, StoreError, VigilError};
pub use events::{EventBus, VigilEvent};
pub use runtime::Vigil;
