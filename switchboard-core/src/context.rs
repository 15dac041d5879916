//! Session context values.
//!
//! The session context is an open key/value mapping used to dynamically
//! configure the completion loop (caller identity, call metadata, live
//! operator guidance). Local reads always see exactly what was set; only
//! structured (object/array) values are eligible for remote mirroring.

use crate::{CallId, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Session context: named fields mapped to arbitrary JSON values.
pub type SessionContext = BTreeMap<String, Value>;

/// A partial context mutation: `Some(value)` sets a key, `None` removes it.
pub type ContextUpdate = BTreeMap<String, Option<Value>>;

/// Well-known context key holding the call details record.
pub const CALL_CONTEXT_KEY: &str = "call";

// ============================================================================
// STRUCTURED VALUE CONTRACT
// ============================================================================

/// A context value that satisfies the remote-mirroring contract.
///
/// The remote store only accepts record/array shaped items, so
/// mirror-eligibility is decided here, at a typed boundary, instead of by
/// inspecting values at publish time. Scalars are still storable locally;
/// they just never leave the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredValue(Value);

impl StructuredValue {
    /// Validate that `value` is object- or array-shaped.
    pub fn new(value: Value) -> Result<Self, ValidationError> {
        if value.is_object() || value.is_array() {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidValue {
                field: "context value".to_string(),
                reason: format!("scalar values cannot be mirrored remotely: {value}"),
            })
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl TryFrom<Value> for StructuredValue {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// ============================================================================
// CALL DETAILS
// ============================================================================

/// Direction of the call relative to this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Telephony call status, mirroring the provider's webhook vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Queued,
    Ringing,
    InProgress,
    Completed,
    Busy,
    Failed,
    NoAnswer,
}

/// Metadata describing the call this session belongs to.
///
/// Stored under [`CALL_CONTEXT_KEY`] in the session context so the live
/// dashboard sees caller identity and call progress alongside the turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDetails {
    pub call_id: CallId,
    pub direction: CallDirection,
    pub from: String,
    pub to: String,
    pub participant_phone: String,
    pub started_at: Timestamp,
    pub status: CallStatus,
}

impl CallDetails {
    /// Encode into the structured value stored in the context map.
    ///
    /// Serialization of a plain struct cannot fail, but the structured
    /// contract is still enforced through the same boundary as every other
    /// context value.
    pub fn to_structured(&self) -> Result<StructuredValue, ValidationError> {
        let value = serde_json::to_value(self).map_err(|e| ValidationError::InvalidValue {
            field: CALL_CONTEXT_KEY.to_string(),
            reason: e.to_string(),
        })?;
        StructuredValue::new(value)
    }
}

// ============================================================================
// TESTS
// ============================================================================
