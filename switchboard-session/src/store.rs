//! Authoritative in-process state for one call session.
//!
//! `SessionStore` composes the turn log, the context map, and the parking
//! lot, and owns the wiring that keeps the remote synchronized store
//! eventually consistent with them:
//!
//! - every turn mutation event fans out to the publication queue;
//! - context changes publish exactly their changed keys (when mirroring is
//!   requested by the caller);
//! - the remote change feed is consumed, ignoring `is_local` echoes and
//!   re-applying remote-originated context changes without re-publishing
//!   them. Turns are one-directional: local state only flows out.

use crate::{ContextStore, ParkingLot, ParkingLotItems, SessionEvents, TurnStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use serde_json::Value;
use switchboard_core::{
    CallId, CallStatus, ContextUpdate, SessionContext, SessionEvent, TurnId, TurnRecord,
    CALL_CONTEXT_KEY,
};
use switchboard_sync::{
    LocalStateSource, SyncMapEvent, SyncMapKind, SyncQueueService, SyncQueueSnapshot, SyncStore,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Read seam handed to the publication queue. Holds the stores directly so
/// the queue and the session never form a reference cycle.
struct SessionStateSource {
    turns: Arc<TurnStore>,
    context: Arc<ContextStore>,
}

impl LocalStateSource for SessionStateSource {
    fn context_value(&self, key: &str) -> Option<Value> {
        self.context.get(key)
    }

    fn turn(&self, id: TurnId) -> Option<TurnRecord> {
        self.turns.get(id)
    }
}

pub struct SessionStore {
    call_id: CallId,
    events: SessionEvents,
    turns: Arc<TurnStore>,
    context: Arc<ContextStore>,
    parking_lot: ParkingLot,
    sync_queue: Arc<SyncQueueService>,
}

impl SessionStore {
    /// Build the session state for one call and start its mirroring wiring.
    ///
    /// Must be called within a tokio runtime: the mutation forwarder and
    /// the remote-feed consumer are spawned here. The seed context is
    /// queued for initial publication so observers see call metadata
    /// before the first turn.
    pub fn new(
        call_id: CallId,
        remote: Arc<dyn SyncStore>,
        seed_context: SessionContext,
    ) -> Arc<Self> {
        let events = SessionEvents::default();
        let turns = Arc::new(TurnStore::new(call_id.clone(), events.clone()));
        let context = Arc::new(ContextStore::new(
            call_id.clone(),
            events.clone(),
            seed_context.clone(),
        ));

        let source = Arc::new(SessionStateSource {
            turns: Arc::clone(&turns),
            context: Arc::clone(&context),
        });
        let sync_queue = Arc::new(SyncQueueService::new(
            call_id.clone(),
            Arc::clone(&remote),
            source,
        ));

        spawn_mutation_forwarder(call_id.clone(), events.subscribe(), Arc::clone(&sync_queue));
        spawn_remote_feed_consumer(call_id.clone(), remote.subscribe(), Arc::clone(&context));

        // One creation notification per session on the shared stream.
        {
            let queue = Arc::clone(&sync_queue);
            let call_id = call_id.clone();
            tokio::spawn(async move {
                if let Err(err) = queue.announce().await {
                    warn!(call_id = %call_id, error = %err, "session announcement failed");
                }
            });
        }

        // Initial flush: every seeded key becomes visible remotely.
        for key in seed_context.keys() {
            sync_queue.update_context(key.clone());
        }

        Arc::new(Self {
            call_id,
            parking_lot: ParkingLot::new(events.clone()),
            events,
            turns,
            context,
            sync_queue,
        })
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Conversation history.
    pub fn turns(&self) -> &TurnStore {
        &self.turns
    }

    /// Session context.
    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    /// Subscribe to store mutation events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // CONTEXT
    // ========================================================================

    /// Merge a context update.
    ///
    /// When `mirror` is set, exactly the changed keys are queued for
    /// publication. Remote-originated changes must be re-applied with
    /// `mirror = false` so a value the remote store already has is not
    /// published back to it.
    pub fn set_context(&self, update: ContextUpdate, mirror: bool) -> Vec<String> {
        let changed = self.context.set_context(update);
        if mirror {
            for key in &changed {
                self.sync_queue.update_context(key.clone());
            }
        }
        changed
    }

    /// Update the status field of the call-details context entry through
    /// the normal diff/mirror path.
    pub fn set_call_status(&self, status: CallStatus) -> Vec<String> {
        let Some(mut value) = self.context.get(CALL_CONTEXT_KEY) else {
            warn!(call_id = %self.call_id, "no call details in context; status not recorded");
            return Vec::new();
        };
        let Some(entry) = value.as_object_mut() else {
            warn!(call_id = %self.call_id, "call details entry is not an object");
            return Vec::new();
        };
        let Ok(status_value) = serde_json::to_value(status) else {
            return Vec::new();
        };
        entry.insert("status".to_string(), status_value);

        let update: ContextUpdate = BTreeMap::from([(CALL_CONTEXT_KEY.to_string(), Some(value))]);
        self.set_context(update, true)
    }

    // ========================================================================
    // PARKING LOT
    // ========================================================================

    /// Park out-of-band messages for the next completion run.
    pub fn add_parking_lot_item(&self, items: ParkingLotItems) {
        self.parking_lot.add(items);
    }

    /// Merge parked messages into the turn log, system first. Called right
    /// before a completion run starts.
    pub fn insert_parking_lot(&self) {
        self.parking_lot.drain_into(&self.turns);
    }

    pub fn parking_lot_is_empty(&self) -> bool {
        self.parking_lot.is_empty()
    }

    // ========================================================================
    // REMOTE MIRROR
    // ========================================================================

    /// Publication metrics for this session's mirror.
    pub fn sync_metrics(&self) -> SyncQueueSnapshot {
        self.sync_queue.metrics()
    }

    /// Wait for the publication queue to drain. Test/shutdown helper.
    pub async fn quiesce_sync(&self) {
        self.sync_queue.quiesce().await;
    }
}

fn spawn_mutation_forwarder(
    call_id: CallId,
    mut rx: broadcast::Receiver<SessionEvent>,
    queue: Arc<SyncQueueService>,
) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(SessionEvent::TurnAdded { turn }) => queue.add_turn(&turn),
                Ok(SessionEvent::TurnUpdated { id }) => queue.update_turn(id),
                Ok(SessionEvent::TurnDeleted { id, .. }) => queue.delete_turn(id),
                // Context mirroring is decided at the set_context call site.
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(call_id = %call_id, skipped, "mutation feed lagged; remote may be stale");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_remote_feed_consumer(
    call_id: CallId,
    mut rx: broadcast::Receiver<SyncMapEvent>,
    context: Arc<ContextStore>,
) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    // Echoes of our own writes are ignored.
                    if event.is_local() {
                        continue;
                    }
                    // Turn data is one-directional; only context flows back.
                    if event.map() != SyncMapKind::Context {
                        continue;
                    }
                    match event {
                        SyncMapEvent::ItemAdded { key, data, .. }
                        | SyncMapEvent::ItemUpdated { key, data, .. } => {
                            info!(call_id = %call_id, key = %key, "context updated from remote");
                            context.set_context(BTreeMap::from([(key, Some(data))]));
                        }
                        SyncMapEvent::ItemRemoved { key, .. } => {
                            info!(call_id = %call_id, key = %key, "context removed from remote");
                            context.set_context(BTreeMap::from([(key, None)]));
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(call_id = %call_id, skipped, "remote feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use switchboard_core::{CallDetails, CallDirection, HumanTextParams, TurnPatch};
    use switchboard_sync::InMemorySyncStore;

    fn seed_with_call() -> SessionContext {
        let details = CallDetails {
            call_id: CallId::new("CA-store"),
            direction: CallDirection::Inbound,
            from: "+15550100".to_string(),
            to: "+15550199".to_string(),
            participant_phone: "+15550100".to_string(),
            started_at: chrono::Utc::now(),
            status: CallStatus::InProgress,
        };
        let mut seed = SessionContext::new();
        seed.insert(
            CALL_CONTEXT_KEY.to_string(),
            details.to_structured().unwrap().into_inner(),
        );
        seed
    }

    fn session() -> (Arc<SessionStore>, Arc<InMemorySyncStore>) {
        let remote = Arc::new(InMemorySyncStore::new());
        let store = SessionStore::new(
            CallId::new("CA-store"),
            Arc::clone(&remote) as Arc<dyn SyncStore>,
            seed_with_call(),
        );
        (store, remote)
    }

    async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition never became true: {what}");
    }

    #[tokio::test]
    async fn test_seed_context_is_published_on_start() {
        let (store, remote) = session();
        store.quiesce_sync().await;
        assert_eq!(remote.context_write_count(CALL_CONTEXT_KEY), 1);
        drop(store);
    }

    #[tokio::test]
    async fn test_turn_lifecycle_is_mirrored() {
        let (store, remote) = session();

        let turn = store
            .turns()
            .add_human_text(HumanTextParams::new("I need a ticket").unwrap());
        eventually("turn mirrored", || {
            remote.turn_write_count(turn.id()) >= 1
        })
        .await;

        store.turns().update(
            turn.id(),
            TurnPatch::Redacted { redacted: true },
        );
        eventually("update mirrored", || {
            remote
                .turn_snapshot()
                .get(&turn.id().to_string())
                .map(|t| matches!(t, TurnRecord::HumanText { redacted: true, .. }))
                .unwrap_or(false)
        })
        .await;

        store.turns().delete(turn.id());
        eventually("delete mirrored", || {
            !remote
                .turn_snapshot()
                .contains_key(&turn.id().to_string())
        })
        .await;
    }

    #[tokio::test]
    async fn test_set_context_mirror_flag() {
        let (store, remote) = session();
        store.quiesce_sync().await;

        store.set_context(
            BTreeMap::from([("profile".to_string(), Some(json!({"vip": true})))]),
            true,
        );
        eventually("mirrored key", || remote.context_write_count("profile") == 1).await;

        store.set_context(
            BTreeMap::from([("local_only".to_string(), Some(json!({"n": 1})))]),
            false,
        );
        store.quiesce_sync().await;
        assert_eq!(remote.context_write_count("local_only"), 0);
    }

    #[tokio::test]
    async fn test_deep_equal_update_enqueues_no_publication() {
        let (store, remote) = session();
        store.quiesce_sync().await;
        let writes = remote.context_write_count(CALL_CONTEXT_KEY);

        // Re-apply the exact current value: no event, no publication task.
        let current = store.context().get(CALL_CONTEXT_KEY).unwrap();
        let changed = store.set_context(
            BTreeMap::from([(CALL_CONTEXT_KEY.to_string(), Some(current))]),
            true,
        );
        assert!(changed.is_empty());

        store.quiesce_sync().await;
        assert_eq!(remote.context_write_count(CALL_CONTEXT_KEY), writes);
    }

    #[tokio::test]
    async fn test_remote_change_applies_locally_without_republication() {
        let (store, remote) = session();
        store.quiesce_sync().await;

        remote.apply_remote_context("operator_note", json!({"text": "caller is upset"}));
        eventually("remote change applied", || {
            store.context().get("operator_note").is_some()
        })
        .await;

        // The applied value was never published back.
        store.quiesce_sync().await;
        assert_eq!(remote.context_write_count("operator_note"), 0);
    }

    #[tokio::test]
    async fn test_remote_removal_applies_locally() {
        let (store, remote) = session();
        store.quiesce_sync().await;

        remote.apply_remote_context_removal(CALL_CONTEXT_KEY);
        eventually("remote removal applied", || {
            store.context().get(CALL_CONTEXT_KEY).is_none()
        })
        .await;
    }

    #[tokio::test]
    async fn test_local_echoes_are_ignored() {
        let (store, remote) = session();
        store.quiesce_sync().await;
        let writes_after_seed = remote.context_write_count(CALL_CONTEXT_KEY);

        // The seed publication produced an is_local echo on the feed; if it
        // were re-applied and re-published the write count would grow.
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.quiesce_sync().await;
        assert_eq!(
            remote.context_write_count(CALL_CONTEXT_KEY),
            writes_after_seed
        );
    }

    #[tokio::test]
    async fn test_set_call_status_mirrors_through_context() {
        let (store, remote) = session();
        store.quiesce_sync().await;

        let changed = store.set_call_status(CallStatus::Completed);
        assert_eq!(changed, vec![CALL_CONTEXT_KEY.to_string()]);

        eventually("status mirrored", || {
            remote
                .context_snapshot()
                .get(CALL_CONTEXT_KEY)
                .map(|v| v["status"] == "completed")
                .unwrap_or(false)
        })
        .await;
    }

    #[tokio::test]
    async fn test_session_is_announced_exactly_once_on_creation() {
        let (store, remote) = session();
        eventually("session announced", || remote.announcements().len() == 1).await;

        let announcements = remote.announcements();
        assert_eq!(announcements[0].call_id, CallId::new("CA-store"));

        // Further activity never re-announces.
        store.set_call_status(CallStatus::Completed);
        store.quiesce_sync().await;
        assert_eq!(remote.announcements().len(), 1);
    }
}
