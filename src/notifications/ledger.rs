//! Shared notification bookkeeping.
//!
//! The center and the escalation manager read and mutate records through
//! the same lock, so an acknowledgment and an escalation step can never
//! interleave.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::types::{NotificationId, NotificationRecord};

/// Records plus insertion order.
#[derive(Debug, Default)]
pub struct LedgerState {
    records: HashMap<NotificationId, NotificationRecord>,
    order: VecDeque<NotificationId>,
}

impl LedgerState {
    /// Mutable access to one record.
    pub fn get_mut(&mut self, id: NotificationId) -> Option<&mut NotificationRecord> {
        self.records.get_mut(&id)
    }

    /// Shared access to one record.
    #[must_use]
    pub fn get(&self, id: NotificationId) -> Option<&NotificationRecord> {
        self.records.get(&id)
    }

    /// Ids oldest first.
    pub fn ids(&self) -> impl Iterator<Item = NotificationId> + '_ {
        self.order.iter().copied()
    }
}

fn is_settled(record: &NotificationRecord) -> bool {
    !record.state.is_pending() && !record.awaiting_acknowledgment()
}

/// Bounded in-memory notification store.
#[derive(Debug)]
pub struct NotificationLedger {
    limit: usize,
    state: Mutex<LedgerState>,
}

impl NotificationLedger {
    /// Keep at most `limit` settled records. Records still awaiting a
    /// decision or an acknowledgment are never evicted.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Take the ledger lock.
    pub fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a record, evicting the oldest settled records beyond the limit.
    pub fn insert(&self, record: NotificationRecord) {
        let mut state = self.lock();
        state.order.push_back(record.id);
        state.records.insert(record.id, record);

        while state.records.len() > self.limit {
            let victim = state
                .order
                .iter()
                .position(|id| state.records.get(id).is_some_and(is_settled));
            let Some(index) = victim else {
                break;
            };
            if let Some(id) = state.order.remove(index) {
                state.records.remove(&id);
            }
        }
    }

    /// Snapshot of one record.
    #[must_use]
    pub fn get(&self, id: NotificationId) -> Option<NotificationRecord> {
        self.lock().get(id).cloned()
    }

    /// Run `f` on a record under the ledger lock.
    pub fn update<R>(
        &self,
        id: NotificationId,
        f: impl FnOnce(&mut NotificationRecord) -> R,
    ) -> Option<R> {
        self.lock().get_mut(id).map(f)
    }

    /// Up to `limit` records, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<NotificationRecord> {
        let state = self.lock();
        state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.records.get(id).cloned())
            .take(limit)
            .collect()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::notifications::types::{Alert, DeliveryState, Importance};
    use chrono::Utc;

    fn record(title: &str) -> NotificationRecord {
        NotificationRecord::from_alert(
            Alert {
                title: title.to_owned(),
                message: String::new(),
                importance: Importance::Normal,
            },
            Utc::now(),
        )
    }

    #[test]
    fn recent_is_newest_first() {
        let ledger = NotificationLedger::new(10);
        for title in ["a", "b", "c"] {
            ledger.insert(record(title));
        }
        let titles: Vec<String> = ledger.recent(2).into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["c".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn eviction_skips_pending_records() {
        let ledger = NotificationLedger::new(2);
        let pending = record("pending");
        let pending_id = pending.id;
        ledger.insert(pending);

        let mut delivered = record("delivered");
        delivered.state = DeliveryState::Delivered;
        let delivered_id = delivered.id;
        ledger.insert(delivered);

        ledger.insert(record("newest"));
        assert_eq!(ledger.len(), 2);
        assert!(ledger.get(pending_id).is_some());
        assert!(ledger.get(delivered_id).is_none());
    }

    #[test]
    fn eviction_keeps_unacknowledged_urgent_records() {
        let ledger = NotificationLedger::new(2);
        let mut urgent = record("smoke alarm");
        urgent.importance = Importance::Urgent;
        urgent.state = DeliveryState::Delivered;
        let urgent_id = urgent.id;
        ledger.insert(urgent);

        let mut high = record("meeting moved");
        high.importance = Importance::High;
        high.state = DeliveryState::Delivered;
        high.escalation_count = 1;
        let high_id = high.id;
        ledger.insert(high);

        for title in ["a", "b", "c"] {
            let mut low = record(title);
            low.importance = Importance::Low;
            low.state = DeliveryState::Delivered;
            ledger.insert(low);
        }
        assert!(ledger.get(urgent_id).is_some());
        assert!(ledger.get(high_id).is_none());
        assert_eq!(ledger.len(), 2);

        ledger.update(urgent_id, |r| r.user_interacted = true);
        ledger.insert(record("d"));
        assert!(ledger.get(urgent_id).is_none());
    }

    #[test]
    fn update_runs_under_lock() {
        let ledger = NotificationLedger::new(4);
        let r = record("x");
        let id = r.id;
        ledger.insert(r);
        assert_eq!(ledger.update(id, |r| {
            r.user_interacted = true;
            r.escalation_count
        }), Some(0));
        assert!(ledger.get(id).unwrap().user_interacted);
        assert!(ledger.update(NotificationId::new(), |_| ()).is_none());
    }
}
