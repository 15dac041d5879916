//! Switchboard Core - Entity Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains ONLY data types - no orchestration logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod completion;
mod context;
mod error;
mod event;
mod relay;
mod turn;

pub use completion::{
    CompletionChunk, CompletionConfig, FinishReason, ToolDefinition, ToolManifest,
};
pub use context::{
    CallDetails, CallDirection, CallStatus, ContextUpdate, SessionContext, StructuredValue,
    CALL_CONTEXT_KEY,
};
pub use error::{
    LoopError, RegistryError, RelayError, SwitchboardError, SwitchboardResult, SyncError,
    ToolExecutionError, ValidationError,
};
pub use event::{LoopEvent, SessionEvent};
pub use relay::{RelayCommand, RelayEvent};
pub use turn::{
    BotTextParams, BotToolParams, DeliveryStatus, HumanTextParams, SystemParams, ToolCall,
    ToolOutcome, TurnMeta, TurnPatch, TurnRecord, TurnRole,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Turn identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type TurnId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 TurnId (timestamp-sortable).
pub fn new_turn_id() -> TurnId {
    Uuid::now_v7()
}

/// Opaque identifier of one phone call, assigned by the telephony layer.
///
/// A call id is the unit of isolation for all session state: one `CallId`
/// maps to one turn log, one context map, and at most one running
/// completion loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// TESTS
// ============================================================================
