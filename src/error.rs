//! Error types for the vigil engine.

/// Invalid input passed to [`TaskScheduler::schedule`](crate::scheduler::TaskScheduler::schedule).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// The task type discriminator was empty or whitespace.
    #[error("task type must not be empty")]
    EmptyTaskType,

    /// The requested due time lies further in the past than the grace window allows.
    #[error("due time is {late_secs}s in the past (grace window {grace_secs}s)")]
    DueInPast {
        /// How far in the past the requested instant was.
        late_secs: i64,
        /// Configured grace window.
        grace_secs: u64,
    },

    /// The recurrence rule cannot produce a future occurrence.
    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(String),
}

/// Persistence failure in a [`TaskStore`](crate::store::TaskStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(String),

    /// A store lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,

    /// An update targeted a record that does not exist.
    #[error("task not found: {0}")]
    NotFound(String),

    /// An insert reused an existing id.
    #[error("task already exists: {0}")]
    Duplicate(String),

    /// Filesystem failure while preparing the store location.
    #[error("store I/O error: {0}")]
    Io(String),
}

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    /// Rejected schedule request.
    #[error("schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Task persistence unavailable or corrupt.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Notification bookkeeping error.
    #[error("notification error: {0}")]
    Notification(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VigilError>;
