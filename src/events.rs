//! Engine event fan-out.
//!
//! Observers subscribe to a [`EventBus`] and receive every [`VigilEvent`]
//! published after they subscribed, in publication order. Subscribers are
//! served in registration order; dropped receivers are pruned on the next
//! publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::notifications::{Importance, NotificationId};
use crate::scheduler::TaskId;
use crate::scheduler::retry::ErrorKind;

/// Events emitted by the scheduler and the notification center.
#[derive(Debug, Clone, PartialEq)]
pub enum VigilEvent {
    /// A task was persisted and armed.
    TaskScheduled {
        id: TaskId,
        task_type: String,
        due: DateTime<Utc>,
    },
    /// A task was claimed for dispatch.
    TaskFired { id: TaskId },
    /// A one-off task finished.
    TaskCompleted { id: TaskId },
    /// A recurring task finished and was re-armed.
    TaskRescheduled { id: TaskId, next: DateTime<Utc> },
    /// A failed attempt was granted a retry.
    TaskRetrying {
        id: TaskId,
        attempt: u32,
        kind: ErrorKind,
        delay: Duration,
    },
    /// A task reached FAILED.
    TaskFailed { id: TaskId, error: String },
    /// A pending task was cancelled.
    TaskCancelled { id: TaskId },
    /// The sink accepted an alert.
    NotificationDelivered {
        id: NotificationId,
        importance: Importance,
    },
    /// Delivery was deferred.
    NotificationDelayed {
        id: NotificationId,
        delay: Duration,
    },
    /// A stale alert was dropped.
    NotificationSuppressed { id: NotificationId },
    /// An unacknowledged alert was intensified.
    NotificationEscalated { id: NotificationId, level: u32 },
    /// The user acknowledged an alert.
    NotificationInteracted { id: NotificationId },
    /// The sink rejected a delivery.
    NotificationDeliveryFailed {
        id: NotificationId,
        importance: Importance,
        error: String,
    },
}

/// Subscriber handle identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A live subscription.
#[derive(Debug)]
pub struct Subscription {
    /// Pass to [`EventBus::unsubscribe`].
    pub id: SubscriptionId,
    /// Event stream.
    pub receiver: mpsc::UnboundedReceiver<VigilEvent>,
}

type Subscribers = Vec<(SubscriptionId, mpsc::UnboundedSender<VigilEvent>)>;

/// Cloneable publish/subscribe hub.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Subscribers>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, receiver) = mpsc::unbounded_channel();
        self.lock().push((id, tx));
        Subscription { id, receiver }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&self, event: VigilEvent) {
        self.lock()
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Live subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}
