//! Session event distribution.
//!
//! Store mutations and loop output fan out through tokio broadcast
//! channels. Publishing is non-blocking: if nobody listens the event is
//! dropped, and a slow consumer lags rather than stalling the call's
//! real-time path. A subscription is its own disposer — dropping the
//! receiver unsubscribes.

use switchboard_core::{LoopEvent, SessionEvent};
use tokio::sync::broadcast;
use tracing::debug;

/// Default buffer for event subscribers. Slow consumers beyond this lag.
const EVENT_CAPACITY: usize = 256;

/// Publisher/subscriber hub for store mutation events.
#[derive(Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an event to all subscribers. Non-blocking; an event with
    /// no subscribers is simply dropped.
    pub fn publish(&self, event: SessionEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event_type, receivers, "session event");
            }
            Err(_) => {
                debug!(event_type, "session event with no subscribers");
            }
        }
    }

    /// Subscribe to all future session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

/// Publisher/subscriber hub for completion-loop events.
#[derive(Clone)]
pub struct LoopEvents {
    tx: broadcast::Sender<LoopEvent>,
}

impl LoopEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: LoopEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event_type, receivers, "loop event");
            }
            Err(_) => {
                debug!(event_type, "loop event with no subscribers");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.tx.subscribe()
    }
}

impl Default for LoopEvents {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_does_not_panic() {
        let events = SessionEvents::default();
        events.publish(SessionEvent::CompletionRequested);
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_events() {
        let events = SessionEvents::default();
        let mut rx = events.subscribe();

        events.publish(SessionEvent::CompletionRequested);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev, SessionEvent::CompletionRequested);
    }

    #[tokio::test]
    async fn test_dropping_receiver_unsubscribes() {
        let events = LoopEvents::default();
        let rx = events.subscribe();
        drop(rx);
        // Send sees zero receivers; nothing blocks or errors outward.
        events.publish(LoopEvent::RunStarted);
    }
}
