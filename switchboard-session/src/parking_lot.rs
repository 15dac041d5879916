//! Holding area for out-of-band messages.
//!
//! Messages that arrive while the caller is speaking or a completion run is
//! mid-flight would race the run and be missed or misordered if appended
//! directly. Parking them guarantees they are merged into the turn log at
//! the start of the *next* run, with system guidance surfaced before the
//! human message from the same batch.

use crate::{SessionEvents, TurnStore};
use std::sync::Mutex;
use switchboard_core::{HumanTextParams, SessionEvent, SystemParams};
use tracing::debug;

/// Items to park. Each slot is last-write-wins per kind.
#[derive(Debug, Clone, Default)]
pub struct ParkingLotItems {
    pub system: Option<SystemParams>,
    pub human: Option<HumanTextParams>,
}

#[derive(Default)]
struct Slots {
    system: Option<SystemParams>,
    human: Option<HumanTextParams>,
}

pub struct ParkingLot {
    slots: Mutex<Slots>,
    events: SessionEvents,
}

impl ParkingLot {
    pub fn new(events: SessionEvents) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            events,
        }
    }

    /// Park a batch of items and signal that a completion run is wanted.
    ///
    /// The system item is stored before the human item; a new item of the
    /// same kind overwrites the pending one. `CompletionRequested` fires
    /// exactly once per call regardless of how many items were supplied.
    pub fn add(&self, items: ParkingLotItems) {
        {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(system) = items.system {
                slots.system = Some(system);
            }
            if let Some(human) = items.human {
                slots.human = Some(human);
            }
        }
        self.events.publish(SessionEvent::CompletionRequested);
    }

    /// Drain pending items into the turn log, system first, then clear
    /// both slots. Called synchronously right before a completion run
    /// starts.
    pub fn drain_into(&self, turns: &TurnStore) {
        let (system, human) = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            (slots.system.take(), slots.human.take())
        };

        if system.is_none() && human.is_none() {
            return;
        }
        debug!(
            system = system.is_some(),
            human = human.is_some(),
            "draining parking lot"
        );

        if let Some(params) = system {
            turns.add_system(params);
        }
        if let Some(params) = human {
            turns.add_human_text(params);
        }
    }

    pub fn is_empty(&self) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.system.is_none() && slots.human.is_none()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{CallId, TurnRole};

    fn fixture() -> (
        ParkingLot,
        TurnStore,
        tokio::sync::broadcast::Receiver<SessionEvent>,
    ) {
        let events = SessionEvents::default();
        let rx = events.subscribe();
        let turns = TurnStore::new(CallId::new("CA-lot"), events.clone());
        (ParkingLot::new(events), turns, rx)
    }

    #[test]
    fn test_system_inserted_before_human() {
        let (lot, turns, _rx) = fixture();
        lot.add(ParkingLotItems {
            system: Some(SystemParams::new("the caller is a VIP").unwrap()),
            human: Some(HumanTextParams::new("any update on my ticket?").unwrap()),
        });
        lot.drain_into(&turns);

        let listed = turns.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].role(), TurnRole::System);
        assert_eq!(listed[1].role(), TurnRole::Human);
        assert!(lot.is_empty());
    }

    #[test]
    fn test_one_completion_request_per_add_call() {
        let (lot, _turns, mut rx) = fixture();
        lot.add(ParkingLotItems {
            system: Some(SystemParams::new("note").unwrap()),
            human: Some(HumanTextParams::new("question").unwrap()),
        });

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::CompletionRequested);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_same_kind_overwrites_pending_item() {
        let (lot, turns, _rx) = fixture();
        lot.add(ParkingLotItems {
            system: Some(SystemParams::new("first note").unwrap()),
            ..Default::default()
        });
        lot.add(ParkingLotItems {
            system: Some(SystemParams::new("second note").unwrap()),
            ..Default::default()
        });
        lot.drain_into(&turns);

        let listed = turns.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content(), Some("second note"));
    }

    #[test]
    fn test_drain_on_empty_lot_adds_nothing() {
        let (lot, turns, _rx) = fixture();
        lot.drain_into(&turns);
        assert!(turns.is_empty());
    }

    #[test]
    fn test_drained_slots_are_cleared() {
        let (lot, turns, _rx) = fixture();
        lot.add(ParkingLotItems {
            human: Some(HumanTextParams::new("hello?").unwrap()),
            ..Default::default()
        });
        lot.drain_into(&turns);
        lot.drain_into(&turns);
        assert_eq!(turns.len(), 1);
    }
}
