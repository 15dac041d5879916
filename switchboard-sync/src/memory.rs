//! In-memory reference implementation of the remote store.
//!
//! Used by the test suites and by dashboard-side harnesses. Behaves like
//! the real store from the queue's perspective: idempotent sets, not-found
//! on missing removals, an `is_local`-tagged change feed, and a shutdown
//! after which the handle is dead.

use crate::{SessionAnnouncement, SyncMapEvent, SyncMapKind, SyncStore};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use switchboard_core::{StructuredValue, SyncError, TurnId, TurnRecord};
use tokio::sync::{broadcast, Semaphore};

const FEED_CAPACITY: usize = 256;

/// Hand-cranked valve holding remote writes open.
///
/// Coalescing tests park the first task in flight while further updates
/// enqueue behind it, then release the writes one by one.
#[derive(Debug)]
pub struct WriteGate {
    permits: Semaphore,
}

impl WriteGate {
    fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
        }
    }

    /// Allow `n` further writes through.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

fn relock<'a, T>(guard: Result<MutexGuard<'a, T>, std::sync::PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    guard.unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory remote store.
#[derive(Debug)]
pub struct InMemorySyncStore {
    context: RwLock<BTreeMap<String, Value>>,
    turns: RwLock<BTreeMap<String, TurnRecord>>,
    announcements: Mutex<Vec<SessionAnnouncement>>,
    tx: broadcast::Sender<SyncMapEvent>,
    shut_down: AtomicBool,
    gate: Option<Arc<WriteGate>>,
    fail_next: Mutex<Option<SyncError>>,
    context_writes: Mutex<HashMap<String, usize>>,
    turn_writes: Mutex<HashMap<String, usize>>,
}

impl InMemorySyncStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(FEED_CAPACITY);
        Self {
            context: RwLock::new(BTreeMap::new()),
            turns: RwLock::new(BTreeMap::new()),
            announcements: Mutex::new(Vec::new()),
            tx,
            shut_down: AtomicBool::new(false),
            gate: None,
            fail_next: Mutex::new(None),
            context_writes: Mutex::new(HashMap::new()),
            turn_writes: Mutex::new(HashMap::new()),
        }
    }

    /// Create a store whose writes block until the returned gate releases
    /// them.
    pub fn gated() -> (Self, Arc<WriteGate>) {
        let gate = Arc::new(WriteGate::new());
        let mut store = Self::new();
        store.gate = Some(Arc::clone(&gate));
        (store, gate)
    }

    /// Inject a failure for the next write operation.
    pub fn fail_next(&self, error: SyncError) {
        *relock(self.fail_next.lock()) = Some(error);
    }

    /// Simulate a change made by another process (dashboard, handoff
    /// tooling): applied to the map and delivered with `is_local = false`.
    pub fn apply_remote_context(&self, key: &str, value: Value) {
        let existed = {
            let mut ctx = self.context.write().unwrap_or_else(|p| p.into_inner());
            ctx.insert(key.to_string(), value.clone()).is_some()
        };
        let event = if existed {
            SyncMapEvent::ItemUpdated {
                map: SyncMapKind::Context,
                key: key.to_string(),
                data: value,
                is_local: false,
            }
        } else {
            SyncMapEvent::ItemAdded {
                map: SyncMapKind::Context,
                key: key.to_string(),
                data: value,
                is_local: false,
            }
        };
        let _ = self.tx.send(event);
    }

    /// Simulate a removal made by another process.
    pub fn apply_remote_context_removal(&self, key: &str) {
        let removed = {
            let mut ctx = self.context.write().unwrap_or_else(|p| p.into_inner());
            ctx.remove(key).is_some()
        };
        if removed {
            let _ = self.tx.send(SyncMapEvent::ItemRemoved {
                map: SyncMapKind::Context,
                key: key.to_string(),
                is_local: false,
            });
        }
    }

    pub fn context_snapshot(&self) -> BTreeMap<String, Value> {
        self.context
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn turn_snapshot(&self) -> BTreeMap<String, TurnRecord> {
        self.turns.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// How many times a context key has been physically written.
    pub fn context_write_count(&self, key: &str) -> usize {
        relock(self.context_writes.lock())
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// How many times a turn has been physically written.
    pub fn turn_write_count(&self, id: TurnId) -> usize {
        relock(self.turn_writes.lock())
            .get(&id.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn announcements(&self) -> Vec<SessionAnnouncement> {
        relock(self.announcements.lock()).clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    async fn checkpoint(&self) -> Result<(), SyncError> {
        if self.is_shut_down() {
            return Err(SyncError::Other {
                reason: "store has been shut down".to_string(),
            });
        }
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if let Some(error) = relock(self.fail_next.lock()).take() {
            return Err(error);
        }
        Ok(())
    }
}

impl Default for InMemorySyncStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn set_context_item(&self, key: &str, value: StructuredValue) -> Result<(), SyncError> {
        self.checkpoint().await?;

        let value = value.into_inner();
        let existed = {
            let mut ctx = self.context.write().unwrap_or_else(|p| p.into_inner());
            ctx.insert(key.to_string(), value.clone()).is_some()
        };
        *relock(self.context_writes.lock())
            .entry(key.to_string())
            .or_insert(0) += 1;

        let event = if existed {
            SyncMapEvent::ItemUpdated {
                map: SyncMapKind::Context,
                key: key.to_string(),
                data: value,
                is_local: true,
            }
        } else {
            SyncMapEvent::ItemAdded {
                map: SyncMapKind::Context,
                key: key.to_string(),
                data: value,
                is_local: true,
            }
        };
        let _ = self.tx.send(event);
        Ok(())
    }

    async fn remove_context_item(&self, key: &str) -> Result<(), SyncError> {
        self.checkpoint().await?;

        let removed = {
            let mut ctx = self.context.write().unwrap_or_else(|p| p.into_inner());
            ctx.remove(key).is_some()
        };
        if !removed {
            return Err(SyncError::EntityNotFound {
                kind: "context-field".to_string(),
                key: key.to_string(),
            });
        }

        let _ = self.tx.send(SyncMapEvent::ItemRemoved {
            map: SyncMapKind::Context,
            key: key.to_string(),
            is_local: true,
        });
        Ok(())
    }

    async fn set_turn(&self, turn: &TurnRecord) -> Result<(), SyncError> {
        self.checkpoint().await?;

        let key = turn.id().to_string();
        let existed = {
            let mut turns = self.turns.write().unwrap_or_else(|p| p.into_inner());
            turns.insert(key.clone(), turn.clone()).is_some()
        };
        *relock(self.turn_writes.lock()).entry(key.clone()).or_insert(0) += 1;

        let data = serde_json::to_value(turn).map_err(|e| SyncError::Other {
            reason: format!("turn serialization failed: {e}"),
        })?;
        let event = if existed {
            SyncMapEvent::ItemUpdated {
                map: SyncMapKind::Turn,
                key,
                data,
                is_local: true,
            }
        } else {
            SyncMapEvent::ItemAdded {
                map: SyncMapKind::Turn,
                key,
                data,
                is_local: true,
            }
        };
        let _ = self.tx.send(event);
        Ok(())
    }

    async fn remove_turn(&self, id: TurnId) -> Result<(), SyncError> {
        self.checkpoint().await?;

        let key = id.to_string();
        let removed = {
            let mut turns = self.turns.write().unwrap_or_else(|p| p.into_inner());
            turns.remove(&key).is_some()
        };
        if !removed {
            return Err(SyncError::EntityNotFound {
                kind: "turn".to_string(),
                key,
            });
        }

        let _ = self.tx.send(SyncMapEvent::ItemRemoved {
            map: SyncMapKind::Turn,
            key,
            is_local: true,
        });
        Ok(())
    }

    async fn announce_session(&self, announcement: SessionAnnouncement) -> Result<(), SyncError> {
        self.checkpoint().await?;
        relock(self.announcements.lock()).push(announcement);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SyncMapEvent> {
        self.tx.subscribe()
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_core::{HumanTextParams, TurnMeta};

    fn human_turn(content: &str) -> TurnRecord {
        let params = HumanTextParams::new(content).unwrap();
        TurnRecord::HumanText {
            meta: TurnMeta::new(params.id),
            content: params.content,
            redacted: false,
        }
    }

    #[tokio::test]
    async fn test_set_then_update_emits_added_then_updated() {
        let store = InMemorySyncStore::new();
        let mut rx = store.subscribe();

        let v1 = StructuredValue::new(json!({"a": 1})).unwrap();
        let v2 = StructuredValue::new(json!({"a": 2})).unwrap();
        store.set_context_item("call", v1).await.unwrap();
        store.set_context_item("call", v2).await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            SyncMapEvent::ItemAdded { is_local: true, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SyncMapEvent::ItemUpdated { is_local: true, .. }
        ));
        assert_eq!(store.context_write_count("call"), 2);
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let store = InMemorySyncStore::new();
        let err = store.remove_context_item("ghost").await.unwrap_err();
        assert!(matches!(err, SyncError::EntityNotFound { .. }));

        let err = store.remove_turn(uuid::Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, SyncError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn test_turn_roundtrip() {
        let store = InMemorySyncStore::new();
        let turn = human_turn("I need a ticket");
        store.set_turn(&turn).await.unwrap();

        let snapshot = store.turn_snapshot();
        assert_eq!(snapshot.get(&turn.id().to_string()), Some(&turn));

        store.remove_turn(turn.id()).await.unwrap();
        assert!(store.turn_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_remote_apply_is_tagged_not_local() {
        let store = InMemorySyncStore::new();
        let mut rx = store.subscribe();
        store.apply_remote_context("operator_note", json!({"text": "be gentle"}));

        let ev = rx.recv().await.unwrap();
        assert!(!ev.is_local());
        assert_eq!(ev.key(), "operator_note");
    }

    #[tokio::test]
    async fn test_shutdown_kills_writes() {
        let store = InMemorySyncStore::new();
        store.shutdown().await;
        assert!(store.is_shut_down());

        let err = store
            .set_context_item("call", StructuredValue::new(json!({})).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Other { .. }));
    }

    #[tokio::test]
    async fn test_fail_next_injects_once() {
        let store = InMemorySyncStore::new();
        store.fail_next(SyncError::RateLimited {
            reason: "too many requests".to_string(),
        });

        let v = StructuredValue::new(json!({"a": 1})).unwrap();
        let err = store.set_context_item("call", v.clone()).await.unwrap_err();
        assert!(matches!(err, SyncError::RateLimited { .. }));

        // Next write goes through.
        store.set_context_item("call", v).await.unwrap();
    }
}
