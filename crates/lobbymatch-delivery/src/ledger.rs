//! Per-event delivery ledger.
//!
//! Tracks where each event id stands in the publisher: waiting in the
//! outbox, delivered, or dead-lettered. An id that is pending or delivered
//! is never handed to the bus again, so a retried commit or a supervisor
//! re-announcement collapses onto the first delivery. A dead-lettered id
//! may be published again; that is how a re-announced match gets a fresh
//! attempt budget.
//!
//! Only settled ids are evicted, oldest first, once more than `capacity`
//! are remembered. An id still in the outbox is always known. Broker-side
//! dedupe on the message id covers a redelivery after eviction.

use std::collections::{HashMap, VecDeque};

use lobbymatch_types::EventId;

/// Where an event stands in the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Handed over and not yet accepted by the bus.
    Pending { attempts: u32 },
    Delivered,
    DeadLettered,
}

impl DeliveryState {
    fn is_settled(self) -> bool {
        !matches!(self, Self::Pending { .. })
    }
}

pub struct DeliveryLedger {
    states: HashMap<EventId, DeliveryState>,
    /// Settled ids, oldest first.
    settled: VecDeque<EventId>,
    capacity: usize,
}

impl DeliveryLedger {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            states: HashMap::new(),
            settled: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Open a delivery for `id`. Returns `false` if it is already pending
    /// or was delivered.
    pub fn begin(&mut self, id: EventId) -> bool {
        match self.states.get(&id) {
            Some(DeliveryState::Pending { .. } | DeliveryState::Delivered) => false,
            Some(DeliveryState::DeadLettered) => {
                self.settled.retain(|settled| *settled != id);
                self.states.insert(id, DeliveryState::Pending { attempts: 0 });
                true
            }
            None => {
                self.states.insert(id, DeliveryState::Pending { attempts: 0 });
                true
            }
        }
    }

    pub fn failed_attempt(&mut self, id: EventId, attempts: u32) {
        self.states.insert(id, DeliveryState::Pending { attempts });
    }

    pub fn delivered(&mut self, id: EventId) {
        self.settle(id, DeliveryState::Delivered);
    }

    pub fn dead_lettered(&mut self, id: EventId) {
        self.settle(id, DeliveryState::DeadLettered);
    }

    fn settle(&mut self, id: EventId, state: DeliveryState) {
        let was_settled = self
            .states
            .insert(id, state)
            .is_some_and(DeliveryState::is_settled);
        if !was_settled {
            self.settled.push_back(id);
        }
        while self.settled.len() > self.capacity {
            if let Some(oldest) = self.settled.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }

    #[must_use]
    pub fn state(&self, id: &EventId) -> Option<DeliveryState> {
        self.states.get(id).copied()
    }

    /// Ids handed over and not yet settled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.states.len() - self.settled.len()
    }
}

#[cfg(test)]
mod tests {
    use lobbymatch_types::TicketId;

    use super::*;

    fn id(n: u8) -> EventId {
        EventId::deterministic("TICKET_EXPIRED", &TicketId::from_bytes([n; 16]).0)
    }

    #[test]
    fn pending_and_delivered_ids_are_not_reopened() {
        let mut ledger = DeliveryLedger::new(8);
        assert!(ledger.begin(id(1)));
        assert!(!ledger.begin(id(1)), "still in flight");
        ledger.failed_attempt(id(1), 1);
        assert_eq!(ledger.state(&id(1)), Some(DeliveryState::Pending { attempts: 1 }));
        assert!(!ledger.begin(id(1)), "waiting in the outbox");

        ledger.delivered(id(1));
        assert!(!ledger.begin(id(1)));
        assert_eq!(ledger.pending(), 0);
    }

    #[test]
    fn dead_lettered_ids_can_be_published_again() {
        let mut ledger = DeliveryLedger::new(8);
        assert!(ledger.begin(id(2)));
        ledger.dead_lettered(id(2));
        assert_eq!(ledger.state(&id(2)), Some(DeliveryState::DeadLettered));

        assert!(ledger.begin(id(2)));
        assert_eq!(ledger.state(&id(2)), Some(DeliveryState::Pending { attempts: 0 }));
        assert_eq!(ledger.pending(), 1);
    }

    #[test]
    fn evicts_only_settled_ids() {
        let mut ledger = DeliveryLedger::new(2);
        assert!(ledger.begin(id(9)));
        for n in 1..=3 {
            assert!(ledger.begin(id(n)));
            ledger.delivered(id(n));
        }
        assert_eq!(ledger.state(&id(1)), None, "oldest delivery evicted");
        assert_eq!(ledger.state(&id(3)), Some(DeliveryState::Delivered));
        assert!(!ledger.begin(id(9)), "pending ids survive eviction");
        assert_eq!(ledger.pending(), 1);
    }
}
