//! Remote synchronized-store contract.
//!
//! Each call session maps to two containers in the remote store — a context
//! map and a turn map — plus a shared stream carrying one announcement per
//! session. Client bootstrap and credential refresh are an external
//! collaborator's concern; the core receives a ready handle.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_core::{CallId, StructuredValue, SyncError, Timestamp, TurnId, TurnRecord};
use tokio::sync::broadcast;

// ============================================================================
// SUBSCRIPTION FEED
// ============================================================================

/// Which per-session container an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMapKind {
    Context,
    Turn,
}

/// Change notification from the remote store.
///
/// `is_local` marks echoes of this process's own writes so subscribers can
/// ignore them instead of re-applying (and re-publishing) their own state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncMapEvent {
    ItemAdded {
        map: SyncMapKind,
        key: String,
        data: Value,
        is_local: bool,
    },
    ItemUpdated {
        map: SyncMapKind,
        key: String,
        data: Value,
        is_local: bool,
    },
    ItemRemoved {
        map: SyncMapKind,
        key: String,
        is_local: bool,
    },
}

impl SyncMapEvent {
    pub fn is_local(&self) -> bool {
        match self {
            SyncMapEvent::ItemAdded { is_local, .. }
            | SyncMapEvent::ItemUpdated { is_local, .. }
            | SyncMapEvent::ItemRemoved { is_local, .. } => *is_local,
        }
    }

    pub fn map(&self) -> SyncMapKind {
        match self {
            SyncMapEvent::ItemAdded { map, .. }
            | SyncMapEvent::ItemUpdated { map, .. }
            | SyncMapEvent::ItemRemoved { map, .. } => *map,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            SyncMapEvent::ItemAdded { key, .. }
            | SyncMapEvent::ItemUpdated { key, .. }
            | SyncMapEvent::ItemRemoved { key, .. } => key,
        }
    }
}

// ============================================================================
// SESSION ANNOUNCEMENT
// ============================================================================

/// Broadcast once per session on the shared call stream so observers learn
/// a new call exists before its maps fill in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnnouncement {
    pub id: CallId,
    pub call_id: CallId,
    pub date_created: Timestamp,
}

impl SessionAnnouncement {
    pub fn new(call_id: CallId) -> Self {
        Self {
            id: call_id.clone(),
            call_id,
            date_created: Utc::now(),
        }
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Remote synchronized store for one call session.
/// Implementations must be thread-safe (Send + Sync).
///
/// All operations are idempotent from the caller's perspective: setting an
/// existing key overwrites it, and implementations report a missing key on
/// removal via [`SyncError::EntityNotFound`], which callers treat as
/// success.
#[async_trait]
pub trait SyncStore: Send + Sync + std::fmt::Debug {
    /// Write one context field to the context map.
    async fn set_context_item(&self, key: &str, value: StructuredValue) -> Result<(), SyncError>;

    /// Remove one context field from the context map.
    async fn remove_context_item(&self, key: &str) -> Result<(), SyncError>;

    /// Write one turn to the turn map, keyed by turn id.
    async fn set_turn(&self, turn: &TurnRecord) -> Result<(), SyncError>;

    /// Remove one turn from the turn map.
    async fn remove_turn(&self, id: TurnId) -> Result<(), SyncError>;

    /// Publish the one-per-session creation notification.
    async fn announce_session(&self, announcement: SessionAnnouncement) -> Result<(), SyncError>;

    /// Subscribe to the change feed for both maps.
    fn subscribe(&self) -> broadcast::Receiver<SyncMapEvent>;

    /// Release the client. After shutdown no further events are delivered
    /// and writes fail.
    async fn shutdown(&self);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let ev = SyncMapEvent::ItemUpdated {
            map: SyncMapKind::Context,
            key: "call".to_string(),
            data: serde_json::json!({"status": "in-progress"}),
            is_local: true,
        };
        assert!(ev.is_local());
        assert_eq!(ev.map(), SyncMapKind::Context);
        assert_eq!(ev.key(), "call");
    }

    #[test]
    fn test_announcement_carries_call_id_twice() {
        let ann = SessionAnnouncement::new(CallId::new("CA77"));
        assert_eq!(ann.id, ann.call_id);
        let json = serde_json::to_value(&ann).unwrap();
        assert_eq!(json["callId"], "CA77");
    }
}
