//! Key/value session metadata with change diffing.
//!
//! The context dynamically configures the completion loop: caller identity,
//! call metadata, live operator guidance. Updates are merged structurally;
//! an update that changes nothing is a strict no-op (no event, no
//! publication), which is what breaks the feedback loop when remote-store
//! echoes are re-applied locally.

use crate::SessionEvents;
use serde_json::Value;
use std::sync::RwLock;
use switchboard_core::{CallId, ContextUpdate, SessionContext, SessionEvent};
use tracing::debug;

pub struct ContextStore {
    call_id: CallId,
    context: RwLock<SessionContext>,
    events: SessionEvents,
}

impl ContextStore {
    pub fn new(call_id: CallId, events: SessionEvents, seed: SessionContext) -> Self {
        Self {
            call_id,
            context: RwLock::new(seed),
            events,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.context
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    pub fn snapshot(&self) -> SessionContext {
        self.context
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.context
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Merge a partial update into the context.
    ///
    /// Returns the keys whose values actually changed, in sorted order. An
    /// empty return means nothing happened: no merge, no event. Otherwise
    /// the new context replaces the old and `ContextUpdated` is published
    /// with the previous state and the changed keys.
    pub fn set_context(&self, update: ContextUpdate) -> Vec<String> {
        let (previous, next, changed_keys) = {
            let mut context = self.context.write().unwrap_or_else(|p| p.into_inner());

            let mut changed_keys = Vec::new();
            for (key, value) in &update {
                let current = context.get(key);
                let changed = match value {
                    Some(next) => current != Some(next),
                    None => current.is_some(),
                };
                if changed {
                    changed_keys.push(key.clone());
                }
            }

            if changed_keys.is_empty() {
                return Vec::new();
            }

            let previous = context.clone();
            for (key, value) in update {
                match value {
                    Some(next) => {
                        context.insert(key, next);
                    }
                    None => {
                        context.remove(&key);
                    }
                }
            }
            (previous, context.clone(), changed_keys)
        };

        debug!(
            call_id = %self.call_id,
            changed = ?changed_keys,
            "context updated"
        );
        self.events.publish(SessionEvent::ContextUpdated {
            context: next,
            previous,
            changed_keys: changed_keys.clone(),
        });
        changed_keys
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn update(entries: Vec<(&str, Option<Value>)>) -> ContextUpdate {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>()
    }

    fn store() -> (ContextStore, tokio::sync::broadcast::Receiver<SessionEvent>) {
        let events = SessionEvents::default();
        let rx = events.subscribe();
        (
            ContextStore::new(CallId::new("CA-ctx"), events, SessionContext::new()),
            rx,
        )
    }

    #[test]
    fn test_set_and_read_back() {
        let (store, _rx) = store();
        let changed = store.set_context(update(vec![("call", Some(json!({"status": "ringing"})))]));
        assert_eq!(changed, vec!["call"]);
        assert_eq!(store.get("call").unwrap()["status"], "ringing");
    }

    #[test]
    fn test_deep_equal_update_is_strict_noop() {
        let (store, mut rx) = store();
        store.set_context(update(vec![("call", Some(json!({"status": "ringing"})))]));

        // Same value again: no changed keys, no event.
        let changed = store.set_context(update(vec![("call", Some(json!({"status": "ringing"})))]));
        assert!(changed.is_empty());

        // Exactly one event was ever published.
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::ContextUpdated { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_removing_missing_key_is_noop() {
        let (store, mut rx) = store();
        let changed = store.set_context(update(vec![("ghost", None)]));
        assert!(changed.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_partial_update_reports_only_changed_keys() {
        let (store, _rx) = store();
        store.set_context(update(vec![
            ("a", Some(json!({"n": 1}))),
            ("b", Some(json!({"n": 2}))),
        ]));

        let changed = store.set_context(update(vec![
            ("a", Some(json!({"n": 1}))), // unchanged
            ("b", Some(json!({"n": 3}))), // changed
            ("c", Some(json!({"n": 4}))), // new
        ]));
        assert_eq!(changed, vec!["b", "c"]);
    }

    #[test]
    fn test_event_carries_previous_state() {
        let (store, mut rx) = store();
        store.set_context(update(vec![("a", Some(json!({"n": 1})))]));
        store.set_context(update(vec![("a", Some(json!({"n": 2})))]));

        let _first = rx.try_recv().unwrap();
        match rx.try_recv().unwrap() {
            SessionEvent::ContextUpdated {
                context, previous, ..
            } => {
                assert_eq!(previous["a"], json!({"n": 1}));
                assert_eq!(context["a"], json!({"n": 2}));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_scalar_values_are_stored_locally() {
        // The store itself accepts anything; mirror eligibility is the
        // publication path's concern.
        let (store, _rx) = store();
        let changed = store.set_context(update(vec![("counter", Some(json!(42)))]));
        assert_eq!(changed, vec!["counter"]);
        assert_eq!(store.get("counter"), Some(json!(42)));
    }

    #[test]
    fn test_remove_existing_key() {
        let (store, _rx) = store();
        store.set_context(update(vec![("a", Some(json!({"n": 1})))]));
        let changed = store.set_context(update(vec![("a", None)]));
        assert_eq!(changed, vec!["a"]);
        assert!(store.get("a").is_none());
    }
}
